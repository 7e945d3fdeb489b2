//! Mapping builder
//!
//! Flattens a bound controller tree into one [`SingleMapping`] per node: the root first,
//! then every sub-controller in registration order (pre-order). Members keep their
//! declaration order. Backends derive stable external names from this ordering, so it is
//! part of the contract.
//!
//! Building freezes the tree: any later `register_sub_controller` fails.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::attribute::{AnyAttribute, AttrMode};
use crate::controller::{Controller, ControllerNode};
use crate::datatype::DataType;
use crate::error::{CtlError, CtlResult};
use crate::method::{Method, MethodKind};

/// Snapshot of one controller node.
#[derive(Clone)]
pub struct SingleMapping {
    controller: Arc<dyn ControllerNode>,
    path: Vec<String>,
    methods: Vec<(String, Arc<Method>)>,
    attributes: Vec<(String, Arc<dyn AnyAttribute>)>,
}

impl fmt::Debug for SingleMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleMapping")
            .field("path", &self.path)
            .field(
                "methods",
                &self.methods.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field(
                "attributes",
                &self.attributes.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SingleMapping {
    fn capture(controller: Arc<dyn ControllerNode>, path: Vec<String>) -> CtlResult<Self> {
        let core = controller.core();
        let attributes = core.attributes().to_vec();
        let methods = core.methods().to_vec();

        let attr_names: HashSet<&str> = attributes.iter().map(|(n, _)| n.as_str()).collect();
        if let Some((name, _)) = methods.iter().find(|(n, _)| attr_names.contains(n.as_str())) {
            return Err(CtlError::Configuration(format!(
                "'{}' on controller {:?} is both an attribute and a method",
                name, path
            )));
        }

        Ok(Self {
            controller,
            path,
            methods,
            attributes,
        })
    }

    /// The node this snapshot was taken from.
    pub fn controller(&self) -> &Arc<dyn ControllerNode> {
        &self.controller
    }

    /// Path segments from the root; empty for the root itself.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Bound methods in declaration order.
    pub fn methods(&self) -> &[(String, Arc<Method>)] {
        &self.methods
    }

    /// Bound attributes in declaration order.
    pub fn attributes(&self) -> &[(String, Arc<dyn AnyAttribute>)] {
        &self.attributes
    }

    /// Attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Arc<dyn AnyAttribute>> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Method by name.
    pub fn method(&self, name: &str) -> Option<&Arc<Method>> {
        self.methods.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    fn layout(&self) -> ControllerLayout {
        let members = self
            .attributes
            .iter()
            .map(|(name, attr)| {
                (
                    name.clone(),
                    Classification::Attribute {
                        mode: attr.mode(),
                        dtype: attr.dtype().clone(),
                    },
                )
            })
            .chain(self.methods.iter().map(|(name, method)| {
                (
                    name.clone(),
                    Classification::Method {
                        kind: method.kind(),
                    },
                )
            }))
            .collect();
        ControllerLayout {
            path: self.path.clone(),
            members,
        }
    }
}

/// Flattened view of a whole controller tree.
#[derive(Clone)]
pub struct Mapping {
    root: Arc<dyn Controller>,
    mappings: Vec<SingleMapping>,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("mappings", &self.mappings)
            .finish()
    }
}

impl Mapping {
    /// Freeze the tree under `root` and snapshot every node.
    ///
    /// A failed build leaves a previously unfrozen tree open for registration.
    pub fn build<C: Controller>(root: Arc<C>) -> CtlResult<Self> {
        let was_frozen = root.core().is_frozen();
        root.core().freeze();

        let mut mappings = Vec::new();
        let node: Arc<dyn ControllerNode> = root.clone();
        if let Err(e) = collect(node, Vec::new(), &mut mappings) {
            if !was_frozen {
                root.core().thaw();
            }
            return Err(e);
        }

        tracing::debug!(
            controllers = mappings.len(),
            attributes = mappings.iter().map(|m| m.attributes.len()).sum::<usize>(),
            methods = mappings.iter().map(|m| m.methods.len()).sum::<usize>(),
            "built controller mapping"
        );

        Ok(Self {
            root,
            mappings,
        })
    }

    /// The root controller.
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.root
    }

    /// Snapshot of the root.
    pub fn root(&self) -> &SingleMapping {
        // `build` always records the root first.
        &self.mappings[0]
    }

    /// Snapshots of the sub-controllers, in registration order.
    pub fn sub_mappings(&self) -> &[SingleMapping] {
        &self.mappings[1..]
    }

    /// Every snapshot, root first.
    pub fn get_controller_mappings(&self) -> &[SingleMapping] {
        &self.mappings
    }

    /// Snapshot of the node at `path` (segments from the root).
    pub fn find(&self, path: &[&str]) -> Option<&SingleMapping> {
        self.mappings
            .iter()
            .find(|m| m.path.iter().map(String::as_str).eq(path.iter().copied()))
    }

    /// Ordered, serialisable description of the tree.
    pub fn layout(&self) -> Vec<ControllerLayout> {
        self.mappings.iter().map(SingleMapping::layout).collect()
    }
}

fn collect(
    node: Arc<dyn ControllerNode>,
    path: Vec<String>,
    out: &mut Vec<SingleMapping>,
) -> CtlResult<()> {
    let children = node.core().sub_controllers();
    out.push(SingleMapping::capture(node, path.clone())?);
    for child in children {
        let mut child_path = path.clone();
        // Registration guarantees every child has a path.
        if let Some(segment) = child.core().path() {
            child_path.push(segment.to_string());
        }
        collect(child, child_path, out)?;
    }
    Ok(())
}

/// What a mapped member is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "member", rename_all = "snake_case")]
pub enum Classification {
    /// An attribute.
    Attribute {
        /// Access mode.
        mode: AttrMode,
        /// Value kind.
        dtype: DataType,
    },
    /// A method.
    Method {
        /// Scan, put or command.
        kind: MethodKind,
    },
}

/// Layout of one mapped controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerLayout {
    /// Path segments from the root.
    pub path: Vec<String>,
    /// Attributes then methods, each in declaration order.
    pub members: Vec<(String, Classification)>,
}
