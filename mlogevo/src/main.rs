#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::Arg;
use log::LevelFilter;

use cfront::{CompilationError, Compiler};
use mlogev::backend::{make_backend, Arch, Target};

#[derive(Debug)]
enum Error {
    Compile(CompilationError),
    Io(std::io::Error, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Compile(err) => write!(f, "{}", err),
            Error::Io(err, path) => {
                write!(f, "writing output file \"{}\" failed: {}", path.display(), err)
            }
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("SOURCE")
                .help("C source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .takes_value(true)
                .value_name("OUTPUT")
                .default_value("a.mlog.txt")
                .help("Output file, '-' for stdout"),
        )
        .arg(
            Arg::with_name("optimize")
                .short("O")
                .takes_value(true)
                .possible_values(&["0", "1", "2", "3"])
                .default_value("1")
                .help("Optimize level"),
        )
        .arg(
            Arg::with_name("define")
                .short("D")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("MACRO")
                .help("Macros forwarded to the C preprocessor"),
        )
        .arg(
            Arg::with_name("include")
                .short("I")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("DIR")
                .help("Include directories forwarded to the C preprocessor"),
        )
        .arg(
            Arg::with_name("machine_independent")
                .short("f")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("FLAG")
                .help("Toggle machine independent passes (FLAG or no-FLAG)"),
        )
        .arg(
            Arg::with_name("machine_dependent")
                .short("m")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("FLAG")
                .help("Machine dependent options (e.g. strict-32bit, keep-labels)"),
        )
        .arg(
            Arg::with_name("print_basic_blocks")
                .long("print-basic-blocks")
                .help("Dump each function's basic blocks to stderr after optimization"),
        )
        .arg(
            Arg::with_name("skip_preprocess")
                .long("skip-preprocess")
                .help("Pass the source directly to the parser without running cpp"),
        )
        .arg(
            Arg::with_name("march")
                .long("march")
                .takes_value(true)
                .possible_values(&["mlog"])
                .default_value("mlog")
                .help("Target architecture"),
        )
        .arg(
            Arg::with_name("mtarget")
                .long("mtarget")
                .takes_value(true)
                .possible_values(&["mlog", "mlogev_ir"])
                .default_value("mlog")
                .help("Output format"),
        )
        .arg(
            Arg::with_name("log_level")
                .long("log-level")
                .takes_value(true)
                .possible_values(&["DEBUG", "INFO", "WARNING", "ERROR", "FATAL"])
                .default_value("FATAL")
                .help("Log level"),
        )
        .arg(
            Arg::with_name("log_file")
                .long("log-file")
                .takes_value(true)
                .default_value("-")
                .help("Log file path, '-' for stderr"),
        )
        .get_matches();

    init_logging(
        matches.value_of("log_level").unwrap(),
        matches.value_of("log_file").unwrap(),
    );

    let source_file = matches.value_of("SOURCE").unwrap();
    if let Err(err) = compile(&matches, source_file) {
        match err {
            Error::Compile(err) => {
                let coord = err.coord.as_deref().unwrap_or(source_file);
                eprintln!("{}: error: {}", coord, err.reason);
            }
            other => eprintln!("{}", other),
        }
        std::process::exit(1);
    }
}

fn values_of(matches: &clap::ArgMatches, name: &str) -> Vec<String> {
    matches
        .values_of(name)
        .map(|values| values.map(|v| v.to_string()).collect())
        .unwrap_or_else(Vec::new)
}

fn compile(matches: &clap::ArgMatches, source_file: &str) -> Result<(), Error> {
    let arch: Arch = matches.value_of("march").unwrap().parse().unwrap();
    let target: Target = matches.value_of("mtarget").unwrap().parse().unwrap();
    let optimize_level: u32 = matches.value_of("optimize").unwrap().parse().unwrap();
    let machine_dependents = values_of(matches, "machine_dependent");
    let machine_independents = values_of(matches, "machine_independent");

    let mut cpp_args = vec![format!("-DMLOGEV_ARCH={}", arch.id())];
    for include in values_of(matches, "include") {
        cpp_args.push(format!("-I{}", include));
    }
    for define in values_of(matches, "define") {
        cpp_args.push(format!("-D{}", define));
    }

    let mut frontend = Compiler::new();
    let backend = make_backend(
        arch,
        target,
        &machine_dependents,
        &machine_independents,
        optimize_level,
    );

    let frontend_result = frontend
        .compile_file(
            source_file,
            !matches.is_present("skip_preprocess"),
            &cpp_args,
        )
        .map_err(Error::Compile)?;
    let result = backend.compile(frontend_result, matches.is_present("print_basic_blocks"));

    let output = matches.value_of("output").unwrap();
    if output == "-" {
        println!("{}", result);
        return Ok(());
    }
    let output_path = PathBuf::from(output);
    write_output(&output_path, &result).map_err(|err| Error::Io(err, output_path))
}

fn write_output(path: &PathBuf, contents: &str) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

fn init_logging(level: &str, log_file: &str) {
    let filter = match level {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => LevelFilter::Off,
    };
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(filter);
    if log_file != "-" {
        match File::create(log_file) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("cannot open log file {}: {}", log_file, err),
        }
    }
    let _ = builder.try_init();
}
