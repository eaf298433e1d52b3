//! aurelia-asm: assembler command-line interface.
//!
//! Runs the four-stage pipeline (lex → parse → resolve → encode) over one
//! source file and writes the flat binary image.
//!
//! Exit codes: 0 success, 1 assembly error, 2 I/O error, 3 invalid
//! arguments.

use std::env;
use std::process::ExitCode;

use aurelia::asm::{encoder, resolver, Lexer, Parser};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ASSEMBLY_ERROR: u8 = 1;
const EXIT_IO_ERROR: u8 = 2;
const EXIT_INVALID_ARGS: u8 = 3;

fn print_usage(program: &str) {
    println!("Aurelia Assembler");
    println!("Usage: {program} [options] <input.s>");
    println!();
    println!("Options:");
    println!("  -o <file>     Output binary file (default: a.out)");
    println!("  -h, --help    Show this help");
    println!();
    println!("Exit codes:");
    println!("  0  Success");
    println!("  1  Assembly error");
    println!("  2  I/O error");
    println!("  3  Invalid arguments");
}

fn main() -> ExitCode {
    env_logger::init();

    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("aurelia-asm");

    let mut input_file = None;
    let mut output_file = "a.out".to_string();

    let mut iter = argv[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage(program);
                return ExitCode::from(EXIT_SUCCESS);
            }
            "-o" => match iter.next() {
                Some(path) => output_file = path.clone(),
                None => {
                    eprintln!("error: -o requires an argument");
                    print_usage(program);
                    return ExitCode::from(EXIT_INVALID_ARGS);
                }
            },
            other if other.starts_with('-') => {
                eprintln!("error: unknown option: {other}");
                print_usage(program);
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
            other => {
                if input_file.is_some() {
                    eprintln!("error: multiple input files specified");
                    return ExitCode::from(EXIT_INVALID_ARGS);
                }
                input_file = Some(other.to_string());
            }
        }
    }

    let Some(input_file) = input_file else {
        eprintln!("error: no input file specified");
        print_usage(program);
        return ExitCode::from(EXIT_INVALID_ARGS);
    };

    let source = match std::fs::read_to_string(&input_file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {input_file}: {err}");
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    println!("Assembling: {input_file}");

    let tokens = Lexer::new(&source).tokenize();
    println!("  lexer: {} tokens", tokens.len());

    let mut program_ast = match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_ASSEMBLY_ERROR);
        }
    };
    println!(
        "  parser: {} instructions, {} labels, {} data bytes",
        program_ast.instructions.len(),
        program_ast.labels.len(),
        program_ast.data_segment.len()
    );

    if let Err(err) = resolver::resolve(&mut program_ast) {
        eprintln!("{err}");
        return ExitCode::from(EXIT_ASSEMBLY_ERROR);
    }
    println!("  resolver: symbols resolved");

    let text = match encoder::encode(&program_ast.instructions) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_ASSEMBLY_ERROR);
        }
    };
    println!("  encoder: {} bytes", text.len());

    // Flat output: text image followed by the data segment, no header.
    let mut output = text;
    output.extend_from_slice(&program_ast.data_segment);

    if let Err(err) = std::fs::write(&output_file, &output) {
        eprintln!("error: cannot write {output_file}: {err}");
        return ExitCode::from(EXIT_IO_ERROR);
    }

    println!("Wrote {} bytes to {output_file}", output.len());
    ExitCode::from(EXIT_SUCCESS)
}
