//
// edit_locality.rs
//
// Decides whether a text edit stays inside a single member body
//

use std::ops::Range;

use tree_sitter::Node;

use crate::parser_pool;
use crate::solution::LANGUAGE_CSHARP;

/// Members whose `{ ... }` body can change without affecting declarations
const BLOCK_BODY_OWNERS: &[&str] = &[
    "method_declaration",
    "constructor_declaration",
    "destructor_declaration",
    "operator_declaration",
    "conversion_operator_declaration",
    "accessor_declaration",
    "local_function_statement",
];

/// Members that may use an `=> expr` body
const ARROW_BODY_OWNERS: &[&str] = &[
    "method_declaration",
    "constructor_declaration",
    "destructor_declaration",
    "operator_declaration",
    "conversion_operator_declaration",
    "accessor_declaration",
    "local_function_statement",
    "property_declaration",
    "indexer_declaration",
];

const FIELD_OWNERS: &[&str] = &["field_declaration", "event_field_declaration"];

/// How far the effects of an edit can reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditLocality {
    /// Old and new text are identical
    Unchanged,
    /// The edit sits strictly inside the body of `member` (byte range in the new text)
    MemberBody { member: Range<usize> },
    /// Declarations may have changed, or the text could not be parsed cleanly
    Declaration,
}

impl EditLocality {
    pub fn is_member_local(&self) -> bool {
        matches!(self, EditLocality::MemberBody { .. })
    }

    pub fn changed_member(&self) -> Option<Range<usize>> {
        match self {
            EditLocality::MemberBody { member } => Some(member.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MemberBody {
    /// Editable region: between the braces, after `=>`, or after `=`
    inner: Range<usize>,
    member: Range<usize>,
    member_kind: &'static str,
}

/// Classify the edit that turned `old` into `new`.
///
/// Languages without a grammar always classify as [`EditLocality::Declaration`].
pub fn classify_edit(language: &str, old: &str, new: &str) -> EditLocality {
    if old == new {
        return EditLocality::Unchanged;
    }
    if language != LANGUAGE_CSHARP {
        return EditLocality::Declaration;
    }

    let (old_range, new_range) = changed_ranges(old.as_bytes(), new.as_bytes());

    let (Some(old_tree), Some(new_tree)) = (parser_pool::parse(old), parser_pool::parse(new)) else {
        return EditLocality::Declaration;
    };
    if old_tree.root_node().has_error() || new_tree.root_node().has_error() {
        log::trace!("Edit leaves syntax errors; treating as declaration-level");
        return EditLocality::Declaration;
    }

    let old_body = innermost_body(old_tree.root_node(), &old_range);
    let new_body = innermost_body(new_tree.root_node(), &new_range);

    match (old_body, new_body) {
        (Some(o), Some(n)) if o.member.start == n.member.start && o.member_kind == n.member_kind => {
            log::trace!(
                "Edit {:?} confined to {} at {:?}",
                new_range,
                n.member_kind,
                n.member
            );
            EditLocality::MemberBody { member: n.member }
        }
        _ => EditLocality::Declaration,
    }
}

/// Smallest byte ranges in `old` and `new` that differ, found by stripping
/// the common prefix and suffix.
fn changed_ranges(old: &[u8], new: &[u8]) -> (Range<usize>, Range<usize>) {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    (prefix..old.len() - suffix, prefix..new.len() - suffix)
}

fn innermost_body(root: Node<'_>, range: &Range<usize>) -> Option<MemberBody> {
    let mut best: Option<MemberBody> = None;
    let mut cursor = root.walk();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if node.start_byte() > range.start || node.end_byte() < range.end {
            continue;
        }
        if let Some(body) = body_of(node) {
            let contains = body.inner.start <= range.start && range.end <= body.inner.end;
            let smaller = best
                .as_ref()
                .map_or(true, |b| body.inner.len() < b.inner.len());
            if contains && smaller {
                best = Some(body);
            }
        }
        stack.extend(node.children(&mut cursor));
    }
    best
}

fn body_of(node: Node<'_>) -> Option<MemberBody> {
    let parent = node.parent()?;
    let member_kind = |owners: &[&'static str]| owners.iter().copied().find(|k| *k == parent.kind());

    match node.kind() {
        "block" => {
            let kind = member_kind(BLOCK_BODY_OWNERS)?;
            if node.end_byte() < node.start_byte() + 2 {
                return None;
            }
            Some(MemberBody {
                inner: node.start_byte() + 1..node.end_byte() - 1,
                member: parent.byte_range(),
                member_kind: kind,
            })
        }
        "arrow_expression_clause" => {
            let kind = member_kind(ARROW_BODY_OWNERS)?;
            Some(MemberBody {
                inner: (node.start_byte() + 2).min(node.end_byte())..node.end_byte(),
                member: parent.byte_range(),
                member_kind: kind,
            })
        }
        "variable_declarator" => {
            let field = parent.parent()?;
            let kind = FIELD_OWNERS.iter().copied().find(|k| *k == field.kind())?;
            let mut cursor = node.walk();
            let initializer_start = node.children(&mut cursor).find_map(|child| match child.kind() {
                "=" => Some(child.end_byte()),
                "equals_value_clause" => Some(child.start_byte() + 1),
                _ => None,
            })?;
            Some(MemberBody {
                inner: initializer_start..node.end_byte(),
                member: field.byte_range(),
                member_kind: kind,
            })
        }
        _ => None,
    }
}
