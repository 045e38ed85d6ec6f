//! Human-readable summary renderer for change maps.

use crate::change_map::ChangeMap;
use crate::model::{ObjectChange, ObjectId};
use std::collections::BTreeSet;

/// Render a Markdown summary of a [`ChangeMap`].
///
/// Changes are listed sorted by post-commit id. Informational only; the
/// structured map stays the source of truth.
pub fn render_change_map_summary(changes: &ChangeMap) -> String {
    let mut out = String::new();
    out.push_str("## Commit Changes\n\n");

    if changes.is_empty() {
        out.push_str("_No changes recorded._\n");
        return out;
    }

    out.push_str(&format!(
        "**Objects changed**: {}\n\n",
        changes.unique_changes().len()
    ));

    for change in changes.sorted_changes() {
        render_change(&mut out, change);
    }
    out
}

fn render_change(out: &mut String, change: &ObjectChange) {
    out.push_str(&format!(
        "### {} {}\n\n",
        change.change_type, change.post_commit_id
    ));
    if change.pre_commit_id != change.post_commit_id {
        out.push_str(&format!("- **Pre-commit id**: {}\n", change.pre_commit_id));
    }

    for (name, attribute) in &change.attribute_changes {
        out.push_str(&format!(
            "- `{}`: {} → {}\n",
            name, attribute.old, attribute.new
        ));
    }
    for (name, to_one) in &change.to_one_relationship_changes {
        out.push_str(&format!(
            "- `{}`: {} → {}\n",
            name,
            optional_id(to_one.old.as_ref()),
            optional_id(to_one.new.as_ref())
        ));
    }
    for (name, to_many) in &change.to_many_relationship_changes {
        if !to_many.added.is_empty() {
            out.push_str(&format!("- `{}` added: {}\n", name, id_list(&to_many.added)));
        }
        if !to_many.removed.is_empty() {
            out.push_str(&format!(
                "- `{}` removed: {}\n",
                name,
                id_list(&to_many.removed)
            ));
        }
    }
    out.push('\n');
}

fn optional_id(id: Option<&ObjectId>) -> String {
    id.map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string())
}

fn id_list(ids: &BTreeSet<ObjectId>) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
