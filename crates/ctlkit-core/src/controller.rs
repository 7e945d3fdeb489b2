//! Controller / SubController tree
//!
//! A concrete controller type lists its attribute and method templates once, in a
//! [`Declarations`] value it hands out from [`Declare::declarations`] (typically cached in
//! a `once_cell` static). Construction goes through [`bind_controller`] or
//! [`bind_sub_controller`], which create the instance with `Arc::new_cyclic` and run the
//! binding pass inside it: every template is cloned into instance-owned state and paired
//! with a weak reference to the new instance. The `Arc` only becomes visible once binding
//! is complete, so a partially bound controller can never be observed.
//!
//! ```rust,ignore
//! struct Ramp { core: ControllerCore }
//!
//! impl ControllerNode for Ramp {
//!     fn core(&self) -> &ControllerCore { &self.core }
//! }
//! impl SubController for Ramp {}
//!
//! impl Declare for Ramp {
//!     fn declarations() -> CtlResult<&'static Declarations<Self>> {
//!         static DECLS: OnceCell<Declarations<Ramp>> = OnceCell::new();
//!         DECLS.get_or_try_init(|| {
//!             Declarations::new()
//!                 .attribute("enabled", AttrDecl::<Ramp, bool>::read_write(DataType::bool())?)
//!         })
//!     }
//! }
//!
//! let ramp = bind_sub_controller("ramp01", |core| Ramp { core })?;
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::attribute::{AnyAttribute, AttrDecl, AttrTemplate, Attribute};
use crate::datatype::AttrValue;
use crate::error::{CtlError, CtlResult};
use crate::method::{Method, MethodDecl};

// =============================================================================
// Declarations
// =============================================================================

/// Ordered attribute and method templates of controller type `C`.
pub struct Declarations<C> {
    attributes: Vec<(String, Box<dyn AttrTemplate<C>>)>,
    methods: Vec<(String, MethodDecl<C>)>,
}

impl<C> Default for Declarations<C> {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            methods: Vec::new(),
        }
    }
}

impl<C> Declarations<C>
where
    C: Send + Sync + 'static,
{
    /// Empty declaration list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare attribute `name`. Declaration order is kept.
    pub fn attribute<T: AttrValue>(mut self, name: &str, decl: AttrDecl<C, T>) -> CtlResult<Self> {
        validate_name(name)?;
        if self.attributes.iter().any(|(n, _)| n == name) {
            return Err(CtlError::Configuration(format!(
                "attribute '{}' declared twice",
                name
            )));
        }
        if let Some(period) = decl.update_period() {
            if period.is_zero() {
                return Err(CtlError::Configuration(format!(
                    "attribute '{}' has an updater with a zero update period",
                    name
                )));
            }
        }
        self.attributes.push((name.to_string(), Box::new(decl)));
        Ok(self)
    }

    /// Declare method `name`. Declaration order is kept.
    pub fn method(mut self, name: &str, decl: MethodDecl<C>) -> CtlResult<Self> {
        validate_name(name)?;
        if self.methods.iter().any(|(n, _)| n == name) {
            return Err(CtlError::Configuration(format!(
                "method '{}' declared twice",
                name
            )));
        }
        self.methods.push((name.to_string(), decl));
        Ok(self)
    }

    /// Names of the declared attributes, in order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(n, _)| n.as_str())
    }

    /// Names of the declared methods, in order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(n, _)| n.as_str())
    }

    /// Bind every template into `core` for `owner`.
    ///
    /// Members already present in `core` are left alone, so re-entering the binding pass
    /// never replaces live state.
    pub fn bind_into(&self, core: &mut ControllerCore, owner: &Weak<C>) {
        for (name, template) in &self.attributes {
            if core.attribute_dyn(name).is_none() {
                tracing::trace!(attribute = %name, mode = %template.mode(), "binding attribute");
                core.attributes.push((name.clone(), template.bind(owner)));
            }
        }
        for (name, decl) in &self.methods {
            if core.method(name).is_none() {
                core.methods.push((name.clone(), Arc::new(decl.bind(owner))));
            }
        }
    }
}

fn validate_name(name: &str) -> CtlResult<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CtlError::Configuration(format!(
            "'{}' is not a valid member name",
            name
        )))
    }
}

// =============================================================================
// ControllerCore
// =============================================================================

/// Per-instance state every controller node embeds.
pub struct ControllerCore {
    path: Option<String>,
    attributes: Vec<(String, Arc<dyn AnyAttribute>)>,
    methods: Vec<(String, Arc<Method>)>,
    sub_controllers: RwLock<Vec<Arc<dyn ControllerNode>>>,
    frozen: AtomicBool,
}

impl std::fmt::Debug for ControllerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCore")
            .field("path", &self.path)
            .field(
                "attributes",
                &self.attributes.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field(
                "methods",
                &self.methods.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("sub_controllers", &self.sub_controllers.read().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl ControllerCore {
    /// Empty core. `path` is `None` for a root controller.
    pub fn new(path: Option<String>) -> Self {
        Self {
            path,
            attributes: Vec::new(),
            methods: Vec::new(),
            sub_controllers: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Path segment used for external addressing. `None` for the root.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Bound attributes in declaration order.
    pub fn attributes(&self) -> &[(String, Arc<dyn AnyAttribute>)] {
        &self.attributes
    }

    /// Bound methods in declaration order.
    pub fn methods(&self) -> &[(String, Arc<Method>)] {
        &self.methods
    }

    /// Look up a bound attribute without knowing its type.
    pub fn attribute_dyn(&self, name: &str) -> Option<&Arc<dyn AnyAttribute>> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Look up a bound attribute by name and value type.
    pub fn attribute<T: AttrValue>(&self, name: &str) -> CtlResult<Arc<Attribute<T>>> {
        let attr = self.attribute_dyn(name).ok_or_else(|| {
            CtlError::Configuration(format!("no attribute named '{}'", name))
        })?;
        let value_type = attr.value_type();
        attr.clone().into_any().downcast::<Attribute<T>>().map_err(|_| {
            CtlError::Configuration(format!(
                "attribute '{}' holds {}, not {}",
                name,
                value_type,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Look up a bound method.
    pub fn method(&self, name: &str) -> Option<&Arc<Method>> {
        self.methods.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Append `child` to the sub-controller registry.
    ///
    /// Fails once this node has been frozen by a mapping build, if `child` has no path,
    /// or if a sibling already uses the same path.
    pub fn register_sub_controller<S>(&self, child: Arc<S>) -> CtlResult<()>
    where
        S: SubController,
    {
        let path = child.core().path().ok_or_else(|| {
            CtlError::Configuration("a sub-controller must carry a path".into())
        })?;

        // Checked under the registry lock; `freeze` takes the same lock.
        let mut registry = self.sub_controllers.write();
        if self.is_frozen() {
            return Err(CtlError::Configuration(
                "cannot register a sub-controller after the mapping has been built".into(),
            ));
        }
        if registry.iter().any(|c| c.core().path() == Some(path)) {
            return Err(CtlError::Configuration(format!(
                "duplicate sub-controller path '{}'",
                path
            )));
        }
        tracing::debug!(path, "registered sub-controller");
        registry.push(child);
        Ok(())
    }

    /// Registered sub-controllers in registration order.
    pub fn sub_controllers(&self) -> Vec<Arc<dyn ControllerNode>> {
        self.sub_controllers.read().clone()
    }

    /// Refuse further registrations on this node and every descendant.
    pub fn freeze(&self) {
        self.set_frozen(true);
    }

    /// Undo [`freeze`](Self::freeze) after a mapping build that did not complete.
    pub(crate) fn thaw(&self) {
        self.set_frozen(false);
    }

    fn set_frozen(&self, frozen: bool) {
        let registry = self.sub_controllers.write();
        self.frozen.store(frozen, Ordering::SeqCst);
        for child in registry.iter() {
            child.core().set_frozen(frozen);
        }
    }

    /// Whether [`freeze`](Self::freeze) has been called.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Node traits
// =============================================================================

/// Any node of a controller tree.
pub trait ControllerNode: Send + Sync + 'static {
    /// The embedded per-instance state.
    fn core(&self) -> &ControllerCore;
}

/// Root of a controller tree; owns the device lifecycle.
#[async_trait]
pub trait Controller: ControllerNode {
    /// Open the device connection. Run once, before any scan task.
    async fn connect(&self) -> CtlResult<()> {
        Ok(())
    }

    /// Close the device connection during teardown.
    async fn close(&self) -> CtlResult<()> {
        Ok(())
    }
}

/// A nested node addressed through its path segment.
pub trait SubController: ControllerNode {}

/// Controller types with type-level attribute/method templates.
pub trait Declare: ControllerNode + Sized {
    /// The templates of this type, created once.
    fn declarations() -> CtlResult<&'static Declarations<Self>>;
}

fn bind<C, F>(path: Option<String>, build: F) -> CtlResult<Arc<C>>
where
    C: Declare,
    F: FnOnce(ControllerCore) -> C,
{
    let decls = C::declarations()?;
    Ok(Arc::new_cyclic(|owner| {
        let mut core = ControllerCore::new(path);
        decls.bind_into(&mut core, owner);
        build(core)
    }))
}

/// Construct a root controller, binding its declared templates.
pub fn bind_controller<C, F>(build: F) -> CtlResult<Arc<C>>
where
    C: Declare + Controller,
    F: FnOnce(ControllerCore) -> C,
{
    bind(None, build)
}

/// Construct a sub-controller addressed by `path`, binding its declared templates.
pub fn bind_sub_controller<C, F>(path: impl Into<String>, build: F) -> CtlResult<Arc<C>>
where
    C: Declare + SubController,
    F: FnOnce(ControllerCore) -> C,
{
    let path = path.into();
    validate_name(&path)?;
    bind(Some(path), build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrMode;
    use crate::datatype::DataType;
    use once_cell::sync::OnceCell;

    struct Leaf {
        core: ControllerCore,
    }

    impl ControllerNode for Leaf {
        fn core(&self) -> &ControllerCore {
            &self.core
        }
    }

    impl SubController for Leaf {}

    impl Declare for Leaf {
        fn declarations() -> CtlResult<&'static Declarations<Self>> {
            static DECLS: OnceCell<Declarations<Leaf>> = OnceCell::new();
            DECLS.get_or_try_init(|| {
                Declarations::new()
                    .attribute("current", AttrDecl::<Leaf, f64>::read(DataType::float())?)?
                    .attribute("enabled", AttrDecl::<Leaf, bool>::read_write(DataType::bool())?)
            })
        }
    }

    struct Root {
        core: ControllerCore,
    }

    impl ControllerNode for Root {
        fn core(&self) -> &ControllerCore {
            &self.core
        }
    }

    impl Controller for Root {}

    impl Declare for Root {
        fn declarations() -> CtlResult<&'static Declarations<Self>> {
            static DECLS: OnceCell<Declarations<Root>> = OnceCell::new();
            DECLS.get_or_try_init(|| Ok(Declarations::new()))
        }
    }

    fn leaf(path: &str) -> Arc<Leaf> {
        bind_sub_controller(path, |core| Leaf { core }).unwrap()
    }

    #[tokio::test]
    async fn test_instances_do_not_share_state() {
        let a = leaf("a");
        let b = leaf("b");

        a.core.attribute::<bool>("enabled").unwrap().set(true).await.unwrap();

        assert!(a.core.attribute::<bool>("enabled").unwrap().get().unwrap());
        assert!(!b.core.attribute::<bool>("enabled").unwrap().get().unwrap());
        assert!(!Arc::ptr_eq(
            a.core.attribute_dyn("current").unwrap(),
            b.core.attribute_dyn("current").unwrap()
        ));
    }

    #[tokio::test]
    async fn test_rebinding_is_idempotent() {
        let a = leaf("a");
        let enabled = a.core.attribute::<bool>("enabled").unwrap();
        enabled.set(true).await.unwrap();

        let mut core = ControllerCore::new(Some("a".into()));
        let owner = Arc::downgrade(&a);
        let decls = Leaf::declarations().unwrap();
        decls.bind_into(&mut core, &owner);
        let first = core.attribute_dyn("enabled").unwrap().clone();
        decls.bind_into(&mut core, &owner);

        assert_eq!(core.attributes().len(), 2);
        assert!(Arc::ptr_eq(&first, core.attribute_dyn("enabled").unwrap()));
        assert_eq!(
            decls.attribute_names().collect::<Vec<_>>(),
            vec!["current", "enabled"]
        );
    }

    #[test]
    fn test_typed_lookup_errors() {
        let a = leaf("a");
        assert!(a.core.attribute::<i64>("enabled").unwrap_err().is_configuration());
        assert!(a.core.attribute::<bool>("missing").unwrap_err().is_configuration());
        assert_eq!(a.core.attribute_dyn("current").unwrap().mode(), AttrMode::Read);
    }

    #[test]
    fn test_registration_rules() {
        let root = bind_controller(|core| Root { core }).unwrap();
        root.core.register_sub_controller(leaf("ramp01")).unwrap();
        root.core.register_sub_controller(leaf("ramp02")).unwrap();

        let dup = root.core.register_sub_controller(leaf("ramp01")).unwrap_err();
        assert!(dup.is_configuration());

        root.core.freeze();
        let late = root.core.register_sub_controller(leaf("ramp03")).unwrap_err();
        assert!(late.is_configuration());

        let paths: Vec<_> = root
            .core
            .sub_controllers()
            .iter()
            .map(|c| c.core().path().map(str::to_string))
            .collect();
        assert_eq!(paths, vec![Some("ramp01".into()), Some("ramp02".into())]);
        assert!(root.core.sub_controllers()[0].core().is_frozen());
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(bind_sub_controller("bad path", |core| Leaf { core })
            .err()
            .unwrap()
            .is_configuration());
        let err = Declarations::<Leaf>::new()
            .attribute("x", AttrDecl::<Leaf, i64>::read(DataType::int()).unwrap())
            .unwrap()
            .attribute("x", AttrDecl::<Leaf, i64>::read(DataType::int()).unwrap())
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
