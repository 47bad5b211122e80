//! Generation namespaces
//!
//! Every reload attempt gets a fresh generation with its own namespace, so
//! artifacts from different attempts never share a name.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// One reload attempt's namespace/version tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation {
    id: u64,
    namespace: String,
}

impl Generation {
    fn new(root: &str, id: u64) -> Self {
        Self {
            id,
            namespace: format!("{}.generated_{}", root, id),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Dotted namespace, e.g. `hotcmd.generated_42`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespace rendered as a single identifier, e.g. `hotcmd_generated_42`
    pub fn ident(&self) -> String {
        self.namespace.replace('.', "_")
    }

    /// Namespace segments as a relative directory, e.g. `hotcmd/generated_42`
    pub fn relative_dir(&self) -> PathBuf {
        self.namespace.split('.').collect()
    }

    /// Qualify a simple type name with this namespace
    pub fn qualify(&self, type_name: &str) -> String {
        format!("{}.{}", self.namespace, type_name)
    }

    /// Strip this namespace from a qualified name, returning the simple name
    pub fn simple_name<'a>(&self, qualified: &'a str) -> Option<&'a str> {
        qualified
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|name| !name.is_empty() && !name.contains('.'))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)
    }
}

/// Hands out collision-free generations for the lifetime of the process
#[derive(Debug)]
pub struct NamespaceAllocator {
    root: String,
    next_id: AtomicU64,
}

impl NamespaceAllocator {
    /// Upper bound of the random starting id
    const SEED_RANGE: u64 = 100_000_000;

    /// Create an allocator whose counter starts at a random offset
    pub fn new(root: impl Into<String>) -> Self {
        let seed = rand::thread_rng().gen_range(0..Self::SEED_RANGE);
        Self::with_seed(root, seed)
    }

    pub fn with_seed(root: impl Into<String>, seed: u64) -> Self {
        Self {
            root: root.into(),
            next_id: AtomicU64::new(seed),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Allocate the next generation
    pub fn next(&self) -> Generation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Generation::new(&self.root, id)
    }
}
