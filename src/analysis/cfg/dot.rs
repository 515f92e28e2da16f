//! Graphviz rendering of method bodies.
//!
//! Used by hosts to dump a graph before and after deobfuscation. Blocks become record
//! nodes listing their instructions; branch targets are drawn solid and labeled with their
//! operand index, fall-through edges dashed.

use std::fmt::Write;

use crate::analysis::cfg::{MethodBody, ScopeKind};

/// Escapes a string for use inside a quoted DOT label.
///
/// Quotes, backslashes, newlines and angle brackets are escaped; carriage returns are
/// dropped.
#[must_use]
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('<', "\\<")
        .replace('>', "\\>")
}

impl MethodBody {
    /// Renders the graph in DOT format.
    ///
    /// # Arguments
    ///
    /// * `title` - Optional title for the graph
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let dot = body.to_dot(Some("Program::Main"));
    /// std::fs::write("main.dot", dot)?;
    /// ```
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph MethodBody {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"{}\";", escape_dot(name));
            dot.push_str("    labelloc=t;\n");
        }
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for block in self.blocks() {
            let mut label = format!("{}\\l", block.id());
            for instr in block.instructions() {
                let _ = write!(label, "{}\\l", escape_dot(&instr.to_string()));
            }

            let style = if Some(block.id()) == self.entry() {
                ", style=filled, fillcolor=lightgreen"
            } else if self
                .scope(block.scope())
                .is_some_and(|s| matches!(s.kind(), ScopeKind::Handler { .. }))
            {
                ", style=filled, fillcolor=lightyellow"
            } else {
                ""
            };
            let _ = writeln!(dot, "    \"{}\" [label=\"{label}\"{style}];", block.id());
        }

        dot.push('\n');

        for block in self.blocks() {
            for (index, target) in block.targets().iter().enumerate() {
                let _ = writeln!(
                    dot,
                    "    \"{}\" -> \"{target}\" [label=\"{index}\"];",
                    block.id()
                );
            }
            if let Some(next) = block.fallthrough() {
                let _ = writeln!(dot, "    \"{}\" -> \"{next}\" [style=dashed];", block.id());
            }
        }

        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::cfg::MethodBodyBuilder, assembly::Opcode};

    #[test]
    fn test_escape_dot() {
        assert_eq!(escape_dot("List<T>"), "List\\<T\\>");
        assert_eq!(escape_dot("say \"hi\"\r\n"), "say \\\"hi\\\"\\n");
    }

    #[test]
    fn test_to_dot_edges() {
        let body = MethodBodyBuilder::new(1, 0, false)
            .build_with(|m| {
                m.block(0, |b| b.ldarg(0).branch(Opcode::Brtrue, 1, 2));
                m.block(1, |b| b.ret());
                m.block(2, |b| b.ret());
            })
            .unwrap();
        let dot = body.to_dot(Some("Test"));
        assert!(dot.starts_with("digraph MethodBody {"));
        assert!(dot.contains("label=\"Test\""));
        assert!(dot.contains("\"B0\" -> \"B1\" [label=\"0\"]"));
        assert!(dot.contains("\"B0\" -> \"B2\" [style=dashed]"));
    }
}
