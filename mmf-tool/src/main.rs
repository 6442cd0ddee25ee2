use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use mmf_stream::{
    CacheHint, DataStream, Error, FileMode, LineReader, MappedFilePool, MappedStream, PoolOptions,
    StreamOptions,
};
use tracing::debug;

type Failure = Box<dyn std::error::Error>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let MmfCommand { hint, action } = MmfCommand::parse();
    let pool = MappedFilePool::with_options(PoolOptions {
        stream: StreamOptions {
            hint: hint.into(),
            ..StreamOptions::default()
        },
        ..PoolOptions::default()
    });

    let result = match action {
        Action::Cat { file } => cat(&pool, &file),
        Action::Stat { file } => stat(&pool, &file),
        Action::Fill { file, size, byte } => fill(&pool, &file, size, byte),
        Action::Copy { src, dst } => copy(&pool, &src, &dst),
    };

    debug!(remaining = pool.len(), "done");

    if let Err(err) = result {
        eprintln!("mmf: {err}");
        process::exit(1);
    }
}

#[derive(Parser)]
#[command(name = "mmf", version)]
struct MmfCommand {
    /// How the files are going to be accessed, passed on to the OS.
    #[arg(value_enum, long, global = true, default_value_t = Hint::Normal)]
    hint: Hint,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Print the lines of a file.
    Cat { file: PathBuf },
    /// Show the identity and sizes of a file.
    Stat { file: PathBuf },
    /// Map a file of at least `size` bytes for writing and fill those bytes.
    Fill {
        file: PathBuf,
        #[arg(long)]
        size: usize,
        #[arg(long, default_value_t = 0)]
        byte: u8,
    },
    /// Replace the contents of `dst` with those of `src`.
    Copy { src: PathBuf, dst: PathBuf },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Hint {
    Normal,
    Sequential,
    Random,
}

impl From<Hint> for CacheHint {
    fn from(hint: Hint) -> Self {
        match hint {
            Hint::Normal => CacheHint::Normal,
            Hint::Sequential => CacheHint::SequentialScan,
            Hint::Random => CacheHint::RandomAccess,
        }
    }
}

/// Open through the pool, refusing invalid streams.
///
/// An existing empty file is let through, there is just nothing to map.
fn open(
    pool: &MappedFilePool,
    path: &Path,
    mode: FileMode,
    options: &StreamOptions,
) -> Result<Arc<MappedStream>, Failure> {
    let stream = pool.open_file_with(path, mode, options)?;
    let empty = stream.identity().is_some() && stream.size() == 0 && options.min_size == 0;

    if !stream.is_valid() && !empty {
        return Err(match stream.last_error() {
            Some(err) => format!("cannot map {}: {err}", path.display()).into(),
            None => format!("cannot map {}", path.display()).into(),
        });
    }

    Ok(stream)
}

fn cat(pool: &MappedFilePool, path: &Path) -> Result<(), Failure> {
    let stream = open(pool, path, FileMode::Read, &pool.options().stream)?;
    let mut lines = LineReader::new(stream.clone());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut line = String::new();
    while lines.get_line(&mut line) {
        writeln!(out, "{line}")?;
    }

    out.flush()?;
    release(pool, &stream)
}

fn stat(pool: &MappedFilePool, path: &Path) -> Result<(), Failure> {
    let stream = open(pool, path, FileMode::Read, &pool.options().stream)?;

    println!("path:      {}", path.display());
    if let Some(identity) = stream.identity() {
        println!("device:    {}", identity.device());
        println!("serial:    {}", identity.serial());
    }
    println!("size:      {}", stream.size());
    println!("mapped:    {}", stream.mapped_size());
    println!("page size: {}", stream.page_size());

    release(pool, &stream)
}

fn fill(pool: &MappedFilePool, path: &Path, size: usize, byte: u8) -> Result<(), Failure> {
    let options = StreamOptions {
        min_size: size,
        ..pool.options().stream
    };

    let stream = open(pool, path, FileMode::ReadWrite, &options)?;
    let chunk = [byte; 4096];
    let mut written = 0;

    while written < size {
        let n = stream.write(&chunk[..chunk.len().min(size - written)]);
        if n == 0 {
            break;
        }
        written += n;
    }

    if written < size {
        return Err(format!("only {written} of {size} bytes fit the view").into());
    }

    if size > 0 && !stream.save() {
        return Err(format!("cannot save {}", path.display()).into());
    }

    debug!(path = %path.display(), written, "filled");
    release(pool, &stream)
}

fn copy(pool: &MappedFilePool, src: &Path, dst: &Path) -> Result<(), Failure> {
    let source = open(pool, src, FileMode::Read, &pool.options().stream)?;
    let len = usize::try_from(source.size())?;

    if pool.contains(dst, FileMode::Read) {
        release(pool, &source)?;
        return Err(format!("{} and {} are the same file", src.display(), dst.display()).into());
    }

    // Start over from an empty destination, views only ever grow a file.
    std::fs::File::create(dst)?;
    if len == 0 {
        return release(pool, &source);
    }

    let options = StreamOptions {
        min_size: len,
        ..pool.options().stream
    };
    let target = open(pool, dst, FileMode::ReadWrite, &options)?;

    let written = match source.data() {
        Some(data) => target.write(&data[..len.min(data.len())]),
        None => 0,
    };

    if written != len {
        return Err(format!("copied {written} of {len} bytes").into());
    }

    if !target.save() {
        return Err(format!("cannot save {}", dst.display()).into());
    }

    release(pool, &target)?;
    release(pool, &source)
}

/// Hand the stream back to the pool, or close it directly if it was never pooled.
fn release(pool: &MappedFilePool, stream: &Arc<MappedStream>) -> Result<(), Failure> {
    match pool.close_stream(stream) {
        Ok(()) => Ok(()),
        Err(Error::NotFound { .. }) => {
            stream.close();
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
