//! Text and JSON renderings of parsed chunks and mapping reports.

use std::fmt::Write as _;

use luacscope_lib::opcodes::opcode_name;
use luacscope_lib::{
    AbsLineInfo, Chunk, Constant, Decoded, Header, LocVar, LuaStr, MappingReport, MappingSummary,
    Proto, ProtoPath, Source, Upvalue, Value,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpOptions {
    pub format: ReportFormat,
    pub strip_debug: bool,
}

pub fn dump_report(chunk: &Chunk, opts: &DumpOptions) -> anyhow::Result<String> {
    match opts.format {
        ReportFormat::Text => Ok(dump_text(chunk, opts)),
        ReportFormat::Json => {
            let view = ChunkView {
                header: &chunk.header,
                upvalue_count: chunk.upvalue_count,
                protos: chunk
                    .main
                    .walk()
                    .into_iter()
                    .map(|(path, p)| ProtoView::new(path, p, opts.strip_debug))
                    .collect(),
            };
            Ok(serde_json::to_string_pretty(&view)? + "\n")
        }
    }
}

pub fn mapping_report(report: &MappingReport, format: ReportFormat) -> anyhow::Result<String> {
    match format {
        ReportFormat::Text => Ok(mapping_text(report)),
        ReportFormat::Json => {
            let view = MappingView {
                summary: report.summary(),
                mapping: report
                    .mapping
                    .iter()
                    .map(|(&standard, &shuffled)| MappingEntry {
                        standard,
                        standard_name: opcode_name(standard),
                        shuffled,
                        shuffled_name: opcode_name(shuffled),
                    })
                    .collect(),
                unseen: report.unseen(),
                duplicate_targets: report.duplicate_targets().into_iter().collect(),
                conflicts: &report.conflicts,
                mismatches: &report.mismatches,
            };
            Ok(serde_json::to_string_pretty(&view)? + "\n")
        }
    }
}

#[derive(Serialize)]
struct ChunkView<'a> {
    header: &'a Header,
    upvalue_count: u8,
    protos: Vec<ProtoView<'a>>,
}

#[derive(Serialize)]
struct ProtoView<'a> {
    path: ProtoPath,
    source: Option<&'a LuaStr>,
    line_defined: u32,
    last_line_defined: u32,
    num_params: u8,
    is_vararg: u8,
    max_stack_size: u8,
    code: Vec<InstructionView>,
    constants: &'a [Constant],
    upvalues: &'a [Upvalue],
    children: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<DebugView<'a>>,
}

#[derive(Serialize)]
struct InstructionView {
    pc: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    raw: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(flatten)]
    decoded: Option<Decoded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct DebugView<'a> {
    line_info: &'a [i8],
    abs_line_info: &'a [AbsLineInfo],
    loc_vars: &'a [LocVar],
    upvalue_names: &'a [Option<LuaStr>],
}

impl<'a> ProtoView<'a> {
    fn new(path: ProtoPath, p: &'a Proto, strip_debug: bool) -> Self {
        let code = p
            .code
            .iter()
            .enumerate()
            .map(|(pc, ins)| {
                let (decoded, error) = match ins.decode() {
                    Ok(d) => (Some(d), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                InstructionView {
                    pc,
                    offset: p.instruction_span(pc).map(|s| s.start),
                    raw: ins.0,
                    line: if strip_debug { None } else { p.line_at(pc) },
                    decoded,
                    error,
                }
            })
            .collect();
        Self {
            path,
            source: p.source.name(),
            line_defined: p.line_defined,
            last_line_defined: p.last_line_defined,
            num_params: p.num_params,
            is_vararg: p.is_vararg,
            max_stack_size: p.max_stack_size,
            code,
            constants: &p.constants,
            upvalues: &p.upvalues,
            children: p.protos.len(),
            debug: (!strip_debug).then_some(DebugView {
                line_info: &p.line_info,
                abs_line_info: &p.abs_line_info,
                loc_vars: &p.loc_vars,
                upvalue_names: &p.upvalue_names,
            }),
        }
    }
}

#[derive(Serialize)]
struct MappingEntry {
    standard: u8,
    standard_name: Option<&'static str>,
    shuffled: u8,
    shuffled_name: Option<&'static str>,
}

#[derive(Serialize)]
struct MappingView<'a> {
    summary: MappingSummary,
    mapping: Vec<MappingEntry>,
    unseen: Vec<u8>,
    duplicate_targets: Vec<(u8, Vec<u8>)>,
    conflicts: &'a [luacscope_lib::Conflict],
    mismatches: &'a [luacscope_lib::CountMismatch],
}

fn name_or_unknown(op: u8) -> &'static str {
    opcode_name(op).unwrap_or("?")
}

fn constant_tag(v: &Value) -> &'static str {
    match v {
        Value::Nil => "N",
        Value::Boolean(_) => "B",
        Value::Integer(_) => "I",
        Value::Float(_) => "F",
        Value::ShortString(_) => "S",
        Value::LongString(_) => "L",
    }
}

fn dump_text(chunk: &Chunk, opts: &DumpOptions) -> String {
    let mut out = String::new();
    let h = &chunk.header;
    let _ = writeln!(
        out,
        "; Lua {}.{} chunk, format {}{}, Instruction {}, lua_Integer {}, lua_Number {}",
        h.version >> 4,
        h.version & 0xf,
        h.format,
        if h.is_official() { "" } else { " (non-standard)" },
        h.layout.instruction_size,
        h.layout.integer_size,
        h.layout.number_size
    );
    let _ = writeln!(
        out,
        "; {} functions, {} instructions, main closure has {} upvalues",
        chunk.proto_count(),
        chunk.instruction_count(),
        chunk.upvalue_count
    );

    // Sources of the enclosing functions, indexed by depth.
    let mut sources: Vec<Option<&LuaStr>> = Vec::new();
    for (path, p) in chunk.main.walk() {
        sources.truncate(path.depth());
        let source = match &p.source {
            Source::Named(s) => Some(s),
            Source::Inherited => sources.last().copied().flatten(),
        };
        sources.push(source);
        dump_proto(&mut out, &path, p, source, opts);
    }
    out
}

fn dump_proto(out: &mut String, path: &ProtoPath, p: &Proto, source: Option<&LuaStr>, opts: &DumpOptions) {
    let source = source.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string());
    let _ = writeln!(
        out,
        "\nfunction {} <{}:{},{}> ({} instructions at {:#x})",
        path,
        source,
        p.line_defined,
        p.last_line_defined,
        p.code.len(),
        p.code_span.start
    );
    let _ = writeln!(
        out,
        "{}{} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
        p.num_params,
        if p.has_varargs() { "+" } else { "" },
        p.max_stack_size,
        p.upvalues.len(),
        p.loc_vars.len(),
        p.constants.len(),
        p.protos.len()
    );

    for (pc, ins) in p.code.iter().enumerate() {
        let line = match p.line_at(pc) {
            Some(l) if !opts.strip_debug => l.to_string(),
            _ => "-".to_string(),
        };
        let text = match ins.decode() {
            Ok(d) => d.to_string(),
            Err(e) => format!("<{}: {}>", e.kind(), e),
        };
        let offset = match p.instruction_span(pc) {
            Some(span) => format!("{:06x}", span.start),
            None => "-".to_string(),
        };
        let _ = writeln!(out, "\t{}\t[{}]\t{}\t{:08x}\t{}", pc + 1, line, offset, ins.0, text);
    }

    let _ = writeln!(out, "constants ({}):", p.constants.len());
    for (i, k) in p.constants.iter().enumerate() {
        let _ = writeln!(out, "\t{}\t{}\t{}", i, constant_tag(&k.value), k.value);
    }

    if !opts.strip_debug {
        let _ = writeln!(out, "locals ({}):", p.loc_vars.len());
        for (i, lv) in p.loc_vars.iter().enumerate() {
            let name = lv.name.as_ref().map(|n| n.to_string()).unwrap_or_default();
            let _ = writeln!(out, "\t{}\t{}\t{}\t{}", i, name, lv.start_pc + 1, lv.end_pc + 1);
        }
    }

    let _ = writeln!(out, "upvalues ({}):", p.upvalues.len());
    for (i, uv) in p.upvalues.iter().enumerate() {
        let name = match p.upvalue_names.get(i) {
            Some(Some(n)) if !opts.strip_debug => n.to_string(),
            _ => "-".to_string(),
        };
        let _ = writeln!(out, "\t{}\t{}\t{}\t{}\t{}", i, name, u8::from(uv.in_stack), uv.index, uv.kind);
    }
}

fn mapping_text(report: &MappingReport) -> String {
    let mut out = String::new();
    let s = report.summary();
    let _ = writeln!(out, "{:<8} {:<12} {:<8} {:<12}", "standard", "name", "shuffled", "name");
    for (&std_op, &shuf_op) in &report.mapping {
        let mark = if std_op == shuf_op { "" } else { " *" };
        let _ = writeln!(
            out,
            "{:<8} {:<12} {:<8} {:<12}{}",
            std_op,
            name_or_unknown(std_op),
            shuf_op,
            name_or_unknown(shuf_op),
            mark
        );
    }

    let _ = writeln!(
        out,
        "\n{} of {} opcodes mapped ({} unchanged, {} changed) from {} instructions in {} functions",
        s.mapped,
        s.mapped + s.unmapped,
        s.identity,
        s.changed,
        s.instructions_compared,
        s.protos_compared
    );

    let unseen = report.unseen();
    if !unseen.is_empty() {
        let names: Vec<String> = unseen.iter().map(|&op| format!("{op}({})", name_or_unknown(op))).collect();
        let _ = writeln!(out, "unseen: {}", names.join(" "));
    }

    let dups = report.duplicate_targets();
    if !dups.is_empty() {
        let _ = writeln!(out, "shuffled opcodes claimed more than once:");
        for (target, sources) in &dups {
            let names: Vec<String> = sources.iter().map(|&op| format!("{op}({})", name_or_unknown(op))).collect();
            let _ = writeln!(out, "\t{} <- {}", target, names.join(", "));
        }
    }

    for c in &report.conflicts {
        let _ = writeln!(out, "{}: {}", c.kind(), c);
    }
    for m in &report.mismatches {
        let _ = writeln!(out, "{}: {}", m.kind(), m);
    }
    out
}
