//! cryptar: password-protected, chunked, optionally-compressed file archives
//!
//! Commands:
//!   create          - create an archive from a file or directory tree
//!   add             - append files to an existing archive
//!   list            - list items, optionally filtered by a glob
//!   extract         - extract the archive to a directory
//!   delete          - tombstone items matching a glob
//!   move            - rename items or move them under a new prefix
//!   compact         - drop tombstoned items and reclaim space
//!   update-password - rotate the archive password

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use cryptar_archive::{Archive, ItemHeader, ItemKind};
use cryptar_core::ArchiveOptions;

// ── CLI structure ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cryptar",
    version,
    about = "Single-file encrypted archives",
    long_about = "cryptar: tar-style archives where every entry header and data chunk \
                  is individually authenticated-encrypted"
)]
struct Cli {
    /// Archive file
    #[arg(long, short = 'f', global = true)]
    file: Option<PathBuf>,

    /// Archive password (prompted when absent)
    #[arg(
        long,
        env = "CRYPTAR_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    password: Option<String>,

    /// Per-entry progress output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an archive from a file or directory tree
    Create {
        /// File or directory to archive
        path: PathBuf,
        /// Compress chunks with zstd
        #[arg(long, short = 'c')]
        compression: bool,
        /// Plaintext bytes per chunk (minimum 64 KiB)
        #[arg(long)]
        chunk_size: Option<u64>,
        /// TOML file with default archive options
        #[arg(long, env = "CRYPTAR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Append a file or directory tree to an existing archive
    Add {
        /// File or directory to append
        path: PathBuf,
    },

    /// List archive items
    List {
        /// Shell-style glob over archived paths (e.g. "*.txt", "docs/*")
        pattern: Option<String>,
        /// Emit one JSON object per item instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Extract the archive to a directory
    Extract {
        /// Destination directory
        dest: PathBuf,
    },

    /// Tombstone items matching a glob (space is reclaimed by `compact`)
    Delete {
        /// Shell-style glob over archived paths
        pattern: String,
    },

    /// Move items to another path
    ///
    /// A single match is renamed to exactly TARGET; multiple matches are
    /// placed under TARGET as a prefix.
    Move {
        /// Shell-style glob over archived paths
        pattern: String,
        /// New path (single match) or prefix (multiple matches)
        target: String,
    },

    /// Remove tombstoned items from the archive
    Compact,

    /// Rotate the archive password
    #[command(name = "update-password")]
    UpdatePassword,
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let archive_file = absolutize(
        cli.file
            .as_deref()
            .context("no archive file given (use --file <archive>)")?,
    )?;
    if archive_file.extension().and_then(|e| e.to_str()) != Some("star") {
        bail!(
            "archive file {} must have a .star extension",
            archive_file.display()
        );
    }

    let creating = matches!(cli.command, Commands::Create { .. });
    if creating && archive_file.exists() {
        bail!("archive {} already exists", archive_file.display());
    }
    if !creating && !archive_file.exists() {
        bail!("archive {} does not exist", archive_file.display());
    }

    let password = resolve_password(cli.password.as_deref(), creating)?;
    let options = resolve_options(&cli.command)?;

    let mut arch = Archive::open(&archive_file, &password, options)?;

    match cli.command {
        Commands::Create { path, .. } | Commands::Add { path } => {
            let path = absolutize(&path)?;
            let base = base_of(&path)?;
            add_with_progress(&mut arch, &base, &path, cli.verbose)?;
        }

        Commands::List { pattern, json } => {
            arch.list(pattern.as_deref(), |item| {
                if json {
                    match serde_json::to_string(&item.header) {
                        Ok(line) => println!("{line}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                } else {
                    println!("{}", format_item(&item.header));
                }
            })?;
        }

        Commands::Extract { dest } => {
            let dest = absolutize(&dest)?;
            let verbose = cli.verbose;
            arch.extract(&dest, |item| {
                if verbose {
                    println!("{}", format_item(&item.header));
                }
            })?;
        }

        Commands::Delete { pattern } => {
            let count = arch.delete(&pattern)?;
            println!("{count} item(s) deleted");
        }

        Commands::Move { pattern, target } => {
            let count = arch.move_items(&pattern, &target)?;
            println!("{count} item(s) moved");
        }

        Commands::Compact => {
            arch.compact()?;
            println!("archive compacted");
        }

        Commands::UpdatePassword => {
            let new_password = prompt_new_password()?;
            arch.update_password(&new_password)?;
            println!("password updated");
        }
    }

    Ok(())
}

// ── Password handling ──────────────────────────────────────────────────────

fn resolve_password(flag: Option<&str>, confirm: bool) -> Result<SecretString> {
    if let Some(p) = flag {
        return Ok(SecretString::from(p));
    }

    let p = rpassword::prompt_password("Password: ").context("failed to read password")?;
    if confirm {
        let repeat =
            rpassword::prompt_password("Repeat password: ").context("failed to read password")?;
        if p != repeat {
            bail!("passwords do not match");
        }
    }

    Ok(SecretString::from(p))
}

fn prompt_new_password() -> Result<SecretString> {
    let p = rpassword::prompt_password("New password: ").context("failed to read password")?;
    let repeat =
        rpassword::prompt_password("Repeat new password: ").context("failed to read password")?;
    if p != repeat {
        bail!("passwords do not match");
    }
    Ok(SecretString::from(p))
}

// ── Option resolution ──────────────────────────────────────────────────────

fn resolve_options(command: &Commands) -> Result<ArchiveOptions> {
    let Commands::Create {
        compression,
        chunk_size,
        config,
        ..
    } = command
    else {
        // Everything except create reads its parameters from the preamble.
        return Ok(ArchiveOptions::default());
    };

    let mut opts = match config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ArchiveOptions::default(),
    };

    if *compression {
        opts.compression = true;
    }
    if let Some(size) = chunk_size {
        opts.chunk_size = *size;
    }
    opts.validate()?;

    Ok(opts)
}

// ── Progress ───────────────────────────────────────────────────────────────

fn add_with_progress(arch: &mut Archive, base: &Path, path: &Path, verbose: bool) -> Result<()> {
    if verbose {
        arch.add_recursive(base, path, |p| println!("+ {}", p.display()))?;
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static template"),
    );
    arch.add_recursive(base, path, |p| {
        spinner.set_message(p.display().to_string());
        spinner.tick();
    })?;
    spinner.finish_and_clear();

    Ok(())
}

// ── Formatting ─────────────────────────────────────────────────────────────

fn format_item(header: &ItemHeader) -> String {
    let deleted = if header.deleted { "(del)" } else { "     " };
    format!(
        "{} {} {} {} {}",
        format_mode(header),
        deleted,
        human_size(header.size),
        format_mtime(header.mtime),
        header.path
    )
}

fn format_mode(header: &ItemHeader) -> String {
    let kind = match header.kind() {
        ItemKind::Directory => 'd',
        ItemKind::Regular => '-',
        ItemKind::Unknown => '?',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (header.mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn human_size(size: i64) -> String {
    const KB: f64 = 1024.0;
    let size = size.max(0) as f64;

    if size < KB {
        format!("{size:>10.0}B")
    } else if size < KB * KB {
        format!("{:>10.3}K", size / KB)
    } else if size < KB * KB * KB {
        format!("{:>10.3}M", size / (KB * KB))
    } else {
        format!("{:>10.3}G", size / (KB * KB * KB))
    }
}

fn format_mtime(mtime: i64) -> String {
    match chrono::DateTime::from_timestamp(mtime, 0) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".into(),
    }
}

// ── Paths ──────────────────────────────────────────────────────────────────

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("resolving working directory")?
            .join(path))
    }
}

/// The base a source path is relativized against: its parent directory, so
/// `create -f a.star /home/user/docs` archives `docs/...`.
fn base_of(path: &Path) -> Result<PathBuf> {
    Ok(path
        .parent()
        .context("source path has no parent directory")?
        .to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(mode: u32, size: i64, deleted: bool) -> ItemHeader {
        let mut h = ItemHeader::new("x".into(), size, 0, 1_700_000_000, mode);
        h.deleted = deleted;
        h
    }

    #[test]
    fn mode_string_regular() {
        assert_eq!(format_mode(&header(0o100_644, 0, false)), "-rw-r--r--");
    }

    #[test]
    fn mode_string_directory() {
        assert_eq!(format_mode(&header(0o040_755, 0, false)), "drwxr-xr-x");
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(6).trim(), "6B");
        assert_eq!(human_size(2048).trim(), "2.000K");
        assert_eq!(human_size(3 * 1024 * 1024).trim(), "3.000M");
    }

    #[test]
    fn deleted_flag_in_listing() {
        let line = format_item(&header(0o100_644, 10, true));
        assert!(line.contains("(del)"));
    }
}
