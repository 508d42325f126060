use std::{
    cell::RefCell,
    error::Error,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
    rc::Rc,
};

use clap::Parser;
use gbasm::{write_object, Assembler, Config, DiskFiles, Severity};
use tracing::Level;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-defined symbols (repeatable)
    #[arg(short = 'D', long, value_name = "KEY1=val", value_parser = gbasm::parse_defines)]
    define: Vec<(String, i32)>,

    /// Search directories for included files
    #[arg(short = 'I', long)]
    include: Vec<PathBuf>,

    /// Byte used to fill `DS` and padded unions
    #[arg(short, long, value_parser = parse_pad)]
    pad: Option<u8>,

    /// Start every file in strict RGBDS mode, without extensions
    #[arg(long)]
    compat: bool,

    /// Output makefile dependencies lines instead of object file
    #[arg(short = 'M')]
    make_depend: bool,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn parse_pad(s: &str) -> Result<u8, Box<dyn Error + Send + Sync + 'static>> {
    let (_, value) = gbasm::parse_defines(&format!("pad={s}"))?;
    u8::try_from(value).map_err(|_| format!("pad byte out of range: {s}").into())
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    match main_real(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn main_real(args: Args) -> Result<ExitCode, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).map_err(|e| format!("cant load config: {e}"))?,
        None => Config::default(),
    };
    config.define.extend(args.define.iter().cloned());
    config.include.extend(args.include.iter().cloned());
    if let Some(pad) = args.pad {
        config.pad = pad;
    }
    config.compatibility |= args.compat;

    let input = fs::canonicalize(&args.source).map_err(|e| format!("cant open file: {e}"))?;
    let input = input
        .to_str()
        .ok_or_else(|| format!("source path is not UTF-8: {}", input.display()))?
        .to_string();

    let files = Rc::new(RefCell::new(DiskFiles::new(config.include.clone())));
    let mut asm = Assembler::new(config, Box::new(Rc::clone(&files)));
    tracing::trace!("assembling {input}");
    asm.assemble(&input)?;
    let object = asm.finish();

    for diag in &object.diagnostics {
        match diag.severity {
            Severity::Error => tracing::error!("{diag}"),
            Severity::Warn => tracing::warn!("{diag}"),
            Severity::Info => tracing::info!("{diag}"),
        }
    }
    if object.has_errors() {
        return Ok(ExitCode::FAILURE);
    }

    let mut output: Box<dyn Write> = match args.output.clone() {
        Some(path) => Box::new(BufWriter::new(
            File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|e| format!("cant open file: {e}"))?,
        )),
        None => Box::new(io::stdout()),
    };

    if args.make_depend {
        let mut obj = args.source.clone();
        obj.set_extension("o");
        for include in files.borrow().resolved.iter() {
            if include.to_str() == Some(input.as_str()) {
                continue;
            }
            writeln!(output, "{}: {}", obj.display(), include.display())?;
        }
    } else {
        tracing::trace!("writing");
        write_object(&object, &mut output)?;
    }
    output.flush()?;

    tracing::debug!("sections: {}", object.sections.len());
    tracing::debug!("symbols: {}", object.symbols.len());
    tracing::debug!("patches: {}", object.patches.len());
    Ok(ExitCode::SUCCESS)
}
