// crates/scriptpad-server/src/assemble.rs
// Program assembler - turns raw script text into a complete, compilable
// program while tracking how many synthetic lines precede the user's code

use scriptpad_types::{Script, ScriptConfig, ScriptKind};

/// Lines of wrapper above user code for statements-kind scripts, not counting
/// the hoisted using block: blank line, class header, brace, Main header, brace.
const STATEMENTS_WRAPPER_LINES: u32 = 5;

/// Expression-kind scripts get one extra line (the dump-call opener).
const EXPRESSION_WRAPPER_LINES: u32 = STATEMENTS_WRAPPER_LINES + 1;

/// The full program text derived from a script. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledProgram {
    pub text: String,
    /// Number of lines preceding the first line of original user code.
    /// Zero for ordinary programs.
    pub prefix_line_count: u32,
    /// Hoisted using directives, first occurrence first, duplicates removed
    pub usings: Vec<String>,
}

/// Extra configuration for assembly beyond what the script carries
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Namespaces contributed by the caller (e.g. data-connection scaffolding)
    pub additional_namespaces: Vec<String>,
}

/// Assemble a script into a compilable program.
///
/// Deterministic: the same (script text, kind, configuration) always yields the
/// same text, using set, and `prefix_line_count`.
pub fn assemble(script: &Script, options: &AssembleOptions) -> AssembledProgram {
    match script.config.kind {
        ScriptKind::Program => assemble_program(script),
        ScriptKind::Expression | ScriptKind::Statements => assemble_wrapped(script, options),
    }
}

/// Ordinary programs pass through byte-for-byte. Directives in a valid
/// program already lead the file, and physically moving a stray mid-file
/// directive would shift user lines and break the zero-prefix mapping, so
/// the text is never rewritten; usings are collected (wherever they sit)
/// for project-level merging only.
fn assemble_program(script: &Script) -> AssembledProgram {
    let mut usings = Vec::new();
    for line in script.code.lines() {
        let trimmed = line.trim();
        if is_using_directive(trimmed) && !usings.iter().any(|u| u == trimmed) {
            usings.push(trimmed.to_string());
        }
    }
    AssembledProgram {
        text: script.code.clone(),
        prefix_line_count: 0,
        usings,
    }
}

fn assemble_wrapped(script: &Script, options: &AssembleOptions) -> AssembledProgram {
    let mut usings: Vec<String> = Vec::new();
    let mut body: Vec<String> = Vec::new();

    // Hoist directives; blank their lines in place so every remaining user
    // line keeps its offset from the first body line.
    for line in script.code.lines() {
        let trimmed = line.trim();
        if is_using_directive(trimmed) {
            if !usings.iter().any(|u| u == trimmed) {
                usings.push(trimmed.to_string());
            }
            body.push(String::new());
        } else {
            body.push(line.to_string());
        }
    }

    for ns in ScriptConfig::default_namespaces() {
        push_namespace(&mut usings, ns);
    }
    for ns in &script.config.namespaces {
        push_namespace(&mut usings, ns);
    }
    for ns in &options.additional_namespaces {
        push_namespace(&mut usings, ns);
    }

    let wrapper_lines = match script.config.kind {
        ScriptKind::Expression => EXPRESSION_WRAPPER_LINES,
        _ => STATEMENTS_WRAPPER_LINES,
    };
    let prefix_line_count = usings.len() as u32 + wrapper_lines;

    let mut lines: Vec<String> = Vec::with_capacity(body.len() + usings.len() + 8);
    lines.extend(usings.iter().cloned());
    lines.push(String::new());
    lines.push("public static class Program".to_string());
    lines.push("{".to_string());
    lines.push("    public static async Task Main(string[] args)".to_string());
    lines.push("    {".to_string());

    if script.config.kind == ScriptKind::Expression {
        lines.push("        Console.WriteLine(".to_string());
        lines.extend(body);
        lines.push("        );".to_string());
    } else {
        lines.extend(body);
    }

    lines.push("    }".to_string());
    lines.push("}".to_string());

    AssembledProgram {
        text: lines.join("\n"),
        prefix_line_count,
        usings,
    }
}

/// A `using` directive line, as opposed to a using statement or declaration
fn is_using_directive(trimmed: &str) -> bool {
    let rest = if let Some(r) = trimmed.strip_prefix("global using ") {
        r
    } else if let Some(r) = trimmed.strip_prefix("using ") {
        r
    } else {
        return false;
    };
    trimmed.ends_with(';') && !rest.starts_with("var ") && !rest.starts_with('(')
}

fn push_namespace(usings: &mut Vec<String>, namespace: &str) {
    let ns = namespace.trim();
    if ns.is_empty() {
        return;
    }
    let directive = format!("using {ns};");
    let static_directive = format!("using static {ns};");
    if !usings
        .iter()
        .any(|u| u == &directive || u == &static_directive)
    {
        usings.push(directive);
    }
}
