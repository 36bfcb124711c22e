//! Small accessors over KDL nodes.
//!
//! Settings are written as child nodes with a single argument:
//! `domain "example.org"` inside a `gateway { ... }` block.

use ::kdl::{KdlNode, KdlValue};

/// First argument of the child node called `name`
fn child_value<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlValue> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
        .and_then(|child| child.entries().iter().find(|e| e.name().is_none()))
        .map(|entry| entry.value())
}

pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    child_value(node, name)?.as_string().map(str::to_string)
}

pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    child_value(node, name)?.as_integer()
}

/// Boolean setting; a bare `production` node with no argument counts as true
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    let children = node.children()?;
    let child = children
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)?;

    match child.entries().iter().find(|e| e.name().is_none()) {
        Some(entry) => entry.value().as_bool(),
        None => Some(true),
    }
}
