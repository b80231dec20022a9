use std::sync::Arc;

use crate::plugin_system::module::{
    DefaultModuleDescriptorFactory, ModuleCapabilities, ModuleDescriptor, ModuleDescriptorFactory, ModuleSpec,
    SimpleModuleDescriptor,
};

#[test]
fn test_capabilities_inherit_from_base() {
    let base = ModuleCapabilities::NONE.requiring_restart();
    let own = ModuleCapabilities::NONE.not_disableable();
    let combined = own.inherit(base);
    assert!(combined.requires_restart);
    assert!(combined.cannot_disable);
    assert_eq!(ModuleCapabilities::NONE.inherit(ModuleCapabilities::NONE), ModuleCapabilities::NONE);
}

#[test]
fn test_simple_descriptor_hooks_track_activity() {
    let module = SimpleModuleDescriptor::new("p", "m");
    assert_eq!(module.complete_key(), "p:m");
    assert!(!module.is_active());
    module.enabled().unwrap();
    assert!(module.is_active());
    module.disabled();
    assert!(!module.is_active());
}

#[test]
fn test_failing_enable_hook_keeps_module_inactive() {
    let module = SimpleModuleDescriptor::new("p", "m").with_enable_hook(Arc::new(|key: &str| -> Result<(), String> {
        Err(format!("{key} has no backing service"))
    }));
    let err = module.enabled().unwrap_err();
    assert!(err.to_string().contains("p:m has no backing service"));
    assert!(!module.is_active());
}

#[test]
fn test_factory_resolves_subtype_capabilities_once() {
    let mut factory = DefaultModuleDescriptorFactory::new();
    factory
        .register_type("servlet", ModuleCapabilities::NONE.requiring_restart())
        .register_subtype("filter", "servlet", ModuleCapabilities::NONE);

    let filter = factory.create("web", &ModuleSpec::new("auth", "filter")).unwrap();
    assert_eq!(filter.complete_key(), "web:auth");
    assert_eq!(filter.module_type(), "filter");
    assert!(filter.requires_restart());
    assert!(filter.can_disable());
}

#[test]
fn test_spec_flags_combine_with_type_flags() {
    let mut factory = DefaultModuleDescriptorFactory::new();
    factory.register_type("job", ModuleCapabilities::NONE);

    let mut spec = ModuleSpec::new("nightly", "job");
    spec.capabilities.cannot_disable = true;
    spec.enabled_by_default = false;
    spec.name = Some("Nightly job".to_string());

    let module = factory.create("ops", &spec).unwrap();
    assert!(!module.can_disable());
    assert!(!module.is_enabled_by_default());
    assert_eq!(module.name(), "Nightly job");
}

#[test]
fn test_unknown_type_is_plain_unless_restricted() {
    let open = DefaultModuleDescriptorFactory::new();
    let module = open.create("p", &ModuleSpec::new("m", "mystery")).unwrap();
    assert!(!module.requires_restart());
    assert!(!open.has_module_type("mystery"));

    let restricted = DefaultModuleDescriptorFactory::restricted();
    let err = restricted.create("p", &ModuleSpec::new("m", "mystery")).unwrap_err();
    assert!(err.is_parse_error());
}

#[test]
fn test_module_spec_deserializes_flattened_flags() {
    let spec: ModuleSpec = serde_json::from_str(
        r#"{ "key": "cache", "type": "component", "requires_restart": true }"#,
    )
    .unwrap();
    assert_eq!(spec.module_type, "component");
    assert!(spec.enabled_by_default);
    assert!(spec.capabilities.requires_restart);
    assert!(!spec.capabilities.cannot_disable);
}
