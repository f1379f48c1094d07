use crate::alpine::AlpineBinding;
use crate::binding::ProxyBinding;
use crate::void::VoidBinding;
use crate::CoreError;
use pkgcompat_schema::{CompatConfig, DistroId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Distro name to binding. The only place a distro name selects behaviour.
#[derive(Default, Clone)]
pub struct BindingRegistry {
    bindings: BTreeMap<DistroId, Arc<dyn ProxyBinding>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alpine and Void bindings over `compat_root`, with the config's mapping overrides.
    pub fn builtin(config: &CompatConfig) -> Self {
        let root = &config.isolation.compat_root;
        let mut registry = Self::new();
        registry.register(Arc::new(AlpineBinding::new(
            root,
            config.mapping_override(crate::alpine::ALPINE),
        )));
        registry.register(Arc::new(VoidBinding::new(
            root,
            config.mapping_override(crate::void::VOID),
        )));
        registry
    }

    /// Add or replace the binding for its distro.
    pub fn register(&mut self, binding: Arc<dyn ProxyBinding>) {
        self.bindings.insert(binding.distro().clone(), binding);
    }

    pub fn get(&self, distro: &DistroId) -> Result<Arc<dyn ProxyBinding>, CoreError> {
        self.bindings
            .get(distro)
            .cloned()
            .ok_or_else(|| CoreError::UnsupportedDistro(distro.to_string()))
    }

    pub fn distros(&self) -> Vec<DistroId> {
        self.bindings.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgcompat_schema::parse_config_str;

    #[test]
    fn builtin_registers_alpine_and_void() {
        let registry = BindingRegistry::builtin(&CompatConfig::default());
        assert_eq!(
            registry.distros(),
            vec![DistroId::new("alpine"), DistroId::new("void")]
        );
        assert!(registry.get(&DistroId::new("alpine")).is_ok());
    }

    #[test]
    fn unknown_distro_is_unsupported() {
        let registry = BindingRegistry::builtin(&CompatConfig::default());
        let err = registry.get(&DistroId::new("arch")).err().unwrap();
        assert!(matches!(err, CoreError::UnsupportedDistro(d) if d == "arch"));
    }

    #[test]
    fn config_overrides_reach_bindings() {
        let config = parse_config_str(
            r#"
[isolation]
compat_root = "/opt/compat"
[mapping.void]
version = 3
[mapping.void.packages]
glibc-compat = "libc-compat"
"#,
        )
        .unwrap();
        let registry = BindingRegistry::builtin(&config);
        let void = registry.get(&DistroId::new("void")).unwrap();
        assert_eq!(void.mapping().version, 3);
        assert_eq!(void.mapping().lookup("glibc-compat").unwrap(), "libc-compat");
        assert_eq!(
            void.staging_plan().source_dir,
            std::path::Path::new("/opt/compat/void")
        );
    }
}
