//! End-to-end tests: compile C sources and execute the emitted mlog on the
//! in-tree emulator. Expected values are declared in the sources themselves
//! with ` * <type> <name> = <value>` comment lines.

use cfront::Compiler;
use mlogev::backend::{make_backend, Arch, Target};
use mlogev::text::TextQuadrupleParser;
use mlogrun::{ExitCode, Processor};

const RUN_LIMIT: u64 = 1_000_000;

fn parse_expected_results(source: &str) -> Vec<(String, String, f64)> {
    let mut results = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("* ") {
            continue;
        }
        let tokens: Vec<&str> = trimmed[1..].split_whitespace().collect();
        if tokens.len() == 4 && tokens[2] == "=" {
            if let Ok(value) = tokens[3].parse::<f64>() {
                results.push((tokens[0].to_string(), tokens[1].to_string(), value));
            }
        }
    }
    results
}

fn compile(source: &str, optimize_level: u32, machine_dependents: &[&str]) -> String {
    let mut frontend = Compiler::new();
    let frontend_result = frontend
        .compile_source(source, "test.c")
        .expect("test source should compile");
    let machine_dependents: Vec<String> =
        machine_dependents.iter().map(|s| s.to_string()).collect();
    let backend = make_backend(
        Arch::Mlog,
        Target::Mlog,
        &machine_dependents,
        &[],
        optimize_level,
    );
    backend.compile(frontend_result, false)
}

fn run_program(mlog: &str) -> Processor {
    let mut processor = Processor::new();
    processor
        .assemble_code(mlog)
        .unwrap_or_else(|err| panic!("emitted mlog does not assemble: {}\n{}", err, mlog));
    let exit_code = processor.run_with_limit(RUN_LIMIT);
    assert_eq!(exit_code, ExitCode::Halted, "program:\n{}", mlog);
    processor
}

fn check_source(source: &str, optimize_level: u32) {
    let expected = parse_expected_results(source);
    assert!(!expected.is_empty(), "test source declares no expected results");
    let mlog = compile(source, optimize_level, &[]);
    let processor = run_program(&mlog);
    for (variable_type, name, value) in expected {
        let actual = processor
            .get_variable(&name)
            .unwrap_or_else(|| panic!("variable `{}` was never set in:\n{}", name, mlog));
        if variable_type == "double" || variable_type == "float" {
            assert!(
                (actual - value).abs() < 1e-6,
                "value of `{}` should be {}, got {} in:\n{}",
                name,
                value,
                actual,
                mlog
            );
        } else {
            assert_eq!(
                actual, value,
                "value of `{}` should be {} in:\n{}",
                name, value, mlog
            );
        }
    }
}

macro_rules! source_tests {
    ($( $name:ident => $file:expr ),* $(,)?) => {
        mod opt_level_0 {
            use super::check_source;
            $(
                #[test]
                fn $name() {
                    check_source(include_str!($file), 0);
                }
            )*
        }
        mod opt_level_1 {
            use super::check_source;
            $(
                #[test]
                fn $name() {
                    check_source(include_str!($file), 1);
                }
            )*
        }
    };
}

source_tests! {
    arith => "sources/arith.c",
    float_conv => "sources/float_conv.c",
    for_loop => "sources/for_loop.c",
    while_loop => "sources/while_loop.c",
    do_while => "sources/do_while.c",
    divmod => "sources/divmod.c",
    short_circuit => "sources/short_circuit.c",
    func_call => "sources/func_call.c",
    inline_call => "sources/inline_call.c",
    goto_label => "sources/goto_label.c",
    lcse_fodder => "sources/lcse_fodder.c",
    print => "sources/print.c",
}

#[test]
fn inlined_callees_leave_no_call_sequence() {
    let mlog = compile(include_str!("sources/inline_call.c"), 1, &[]);
    assert!(
        !mlog.contains("retaddr@double_it"),
        "call sequence survived inlining:\n{}",
        mlog
    );
}

#[test]
fn print_builtin_writes_output() {
    let mlog = compile(include_str!("sources/print.c"), 1, &[]);
    let processor = run_program(&mlog);
    assert_eq!(processor.output(), "count: 3");
}

#[test]
fn sensor_reads_host_objects() {
    let mlog = compile(include_str!("sources/sensor.c"), 1, &[]);
    let mut processor = Processor::new();
    processor.define_object("conveyor1", &[("health", 190.0)]);
    processor
        .assemble_code(&mlog)
        .unwrap_or_else(|err| panic!("emitted mlog does not assemble: {}\n{}", err, mlog));
    assert_eq!(processor.run_with_limit(RUN_LIMIT), ExitCode::Halted);
    assert_eq!(processor.get_variable("h"), Some(190.0));
}

#[test]
fn strict_32bit_clamps_overflowing_arithmetic() {
    let source = "/*\n * int x = 0\n */\nint x;\nint main() { x = (1 << 31) * 2; return 0; }";
    let mlog = compile(source, 1, &["strict-32bit"]);
    let processor = run_program(&mlog);
    assert_eq!(processor.get_variable("x"), Some(0.0));
}

#[test]
fn keep_labels_output_still_runs() {
    let source = include_str!("sources/arith.c");
    let mlog = compile(source, 1, &["keep-labels"]);
    assert!(mlog.lines().any(|line| line.ends_with(':')));
    let processor = run_program(&mlog);
    assert_eq!(processor.get_variable("a"), Some(11.0));
    assert_eq!(processor.get_variable("b"), Some(10.0));
}

#[test]
fn passes_can_be_disabled_individually() {
    let source = include_str!("sources/arith.c");
    let mut frontend = Compiler::new();
    let frontend_result = frontend.compile_source(source, "test.c").unwrap();
    let backend = make_backend(
        Arch::Mlog,
        Target::Mlog,
        &[],
        &["no-lcse".to_string(), "no-remove-unused-variables".to_string()],
        1,
    );
    let mlog = backend.compile(frontend_result, false);
    let processor = run_program(&mlog);
    assert_eq!(processor.get_variable("a"), Some(11.0));
}

#[test]
fn ir_dump_round_trips_through_the_reparser() {
    let source = include_str!("sources/func_call.c");
    let mut frontend = Compiler::new();
    let frontend_result = frontend.compile_source(source, "test.c").unwrap();
    let backend = make_backend(Arch::Mlog, Target::MlogevIr, &[], &[], 1);
    let dump = backend.compile(frontend_result, false);
    let reparsed = TextQuadrupleParser::new().parse(dump.lines());
    let redump: Vec<String> = reparsed.iter().map(|ir| ir.dump()).collect();
    assert_eq!(redump.join("\n"), dump);
}
