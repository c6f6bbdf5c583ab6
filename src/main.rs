use clap::Parser;
use dirs::home_dir;
use log::{debug, info};
use nu_ansi_term::{Color, Style};
use plscript::{
    cli::{Args, Commands},
    compiler::{ExecConfig, Executor, Session},
    error::Result,
    parser::parse_with_recovery,
    repl::{REPLPrompt, REPLValidator, SyntaxHighlighter},
    runtime::Value,
    tokenizer::tokenize,
};
use reedline::{DefaultHinter, FileBackedHistory, Reedline, Signal};
use std::{fs, path::PathBuf, process::ExitCode};

fn run_file(file: PathBuf, args: Vec<String>) -> Result<bool> {
    let source = fs::read_to_string(file)?;

    let script_args = Value::array(args.into_iter().map(Value::String).collect());
    let config = ExecConfig {
        preset_globals: vec![("args".to_string(), script_args)],
        ..ExecConfig::default()
    };

    let mut executor = Executor::new(config);
    let result = executor.execute(&source);
    print!("{}", result.output);

    match result.error {
        Some(err) => {
            eprintln!("{}", err);
            Ok(false)
        }
        None => Ok(true),
    }
}

fn check_file(file: PathBuf) -> Result<bool> {
    let source = fs::read_to_string(file)?;

    let tokens = match tokenize(&source) {
        Ok(tokens) => tokens,
        Err(err) => {
            eprintln!("{}", err);
            return Ok(false);
        }
    };

    let (_, errors) = parse_with_recovery(&tokens);
    for err in &errors {
        eprintln!("{}", err);
    }

    Ok(errors.is_empty())
}

fn run_repl() -> Result<()> {
    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().italic().fg(Color::LightGray)),
        ))
        .with_highlighter(Box::new(SyntaxHighlighter))
        .with_validator(Box::new(REPLValidator));

    // Add file-backed history if possible
    if let Some(history) = home_dir()
        .map(|home| home.join(".plscript_history"))
        .and_then(|path| FileBackedHistory::with_file(100, path).ok())
        .map(Box::new)
    {
        line_editor = line_editor.with_history(history);
    } else {
        eprintln!("NOTE: Failed to load history. Persistence is now disabled.")
    }

    let prompt = REPLPrompt;
    let mut session = Session::new();

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                let result = session.evaluate(&buffer);
                print!("{}", result.output);
                for err in &result.errors {
                    eprintln!("{}", err);
                }
                if let Some(value) = result.value {
                    println!("{}", value);
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                break Ok(());
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let ok = match args.command {
        Commands::Run { file, args } => {
            info!("FILE MODE");
            debug!("file: {:?}", file);
            debug!("args: {:?}", args);

            run_file(file, args)
        }
        Commands::Check { file } => {
            info!("CHECK MODE");
            debug!("file: {:?}", file);

            check_file(file)
        }
        Commands::Repl => {
            info!("REPL MODE");

            run_repl().map(|_| true)
        }
    };

    match ok {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
