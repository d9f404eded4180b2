//! Namespace scoping for pod mutation

/// Returns true when `namespace` is eligible for mutation.
///
/// An empty allow-list puts every namespace in scope. Otherwise the match is
/// exact and case-sensitive.
pub fn in_scope(namespace: &str, allowlist: &[String]) -> bool {
    allowlist.is_empty() || allowlist.iter().any(|allowed| allowed == namespace)
}

/// Allow-list of namespaces, fixed at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    allowlist: Vec<String>,
}

impl NamespaceFilter {
    pub fn new(allowlist: Vec<String>) -> Self {
        Self { allowlist }
    }

    /// Filter that lets every namespace through
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_scope(&self, namespace: &str) -> bool {
        in_scope(namespace, &self.allowlist)
    }

    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    pub fn is_global(&self) -> bool {
        self.allowlist.is_empty()
    }
}
