//! Cluster model

use serde::{Deserialize, Serialize};

/// A named deployment target.
///
/// Clusters form a tree through `parent` links. Only the root of a tree
/// owns an authoritative uid/gid range; every descendant allocates out
/// of its root's range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,

    /// Parent cluster name, if any
    #[serde(default)]
    pub parent: Option<String>,

    pub min_uid: u32,
    pub max_uid: u32,
    pub min_gid: u32,
    pub max_gid: u32,
}

impl Cluster {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True if the uid/gid pair falls inside this cluster's range.
    pub fn contains(&self, uid: u32, gid: u32) -> bool {
        (self.min_uid..=self.max_uid).contains(&uid)
            && (self.min_gid..=self.max_gid).contains(&gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_membership() {
        let c = Cluster {
            name: "prod".to_string(),
            parent: None,
            min_uid: 10_000,
            max_uid: 10_999,
            min_gid: 20_000,
            max_gid: 20_999,
        };
        assert!(c.is_root());
        assert!(c.contains(10_000, 20_000));
        assert!(c.contains(10_999, 20_999));
        assert!(!c.contains(11_000, 20_000));
        assert!(!c.contains(10_000, 19_999));
    }
}
