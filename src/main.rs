//! Main entry point for the streamzip CLI application.
//!
//! Lists, extracts or tests ZIP archives from the local filesystem (single
//! files or split volume sets) and from HTTP URLs.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use streamzip::{
    Cli, HttpRangeReader, OpenOptions, VolumeSet, ZipCatalog, ZipExtractor, ZipFileEntry,
    discover_volumes,
};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to the appropriate handler
/// based on whether the input is a local file or HTTP URL.
fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    let mut options = OpenOptions::new();
    if let Some(password) = &cli.password {
        options = options.password(password);
    }

    if cli.is_http_url() {
        // Handle remote ZIP file via HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(cli.file.clone())?);
        let transferred_before = reader.transferred_bytes();
        let volumes = VolumeSet::single(reader.clone());

        let result = process_zip(volumes, options, &cli);

        // Display network transfer statistics for HTTP sources
        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
        result
    } else {
        // Handle local ZIP file, picking up sibling volumes of a split archive
        let paths = discover_volumes(Path::new(&cli.file));
        if paths.len() > 1 && !cli.is_quiet() {
            eprintln!("Reading {} volumes of {}", paths.len(), cli.file);
        }
        let volumes = VolumeSet::open_paths(&paths)
            .with_context(|| format!("cannot open {}", cli.file))?;
        process_zip(volumes, options, &cli)
    }
}

/// Process a ZIP archive based on CLI options.
///
/// - List mode (`-l` or `-v`): Display archive contents
/// - Test mode (`-t`): Decode and verify the selected entries
/// - Extract mode: Extract files matching the specified filters
///
/// Entries are handled in physical order. A failing entry is reported and
/// the remaining entries are still processed.
fn process_zip(volumes: VolumeSet, options: OpenOptions, cli: &Cli) -> Result<()> {
    let catalog = ZipCatalog::with_options(Arc::new(volumes), options)?;
    let mut extractor = ZipExtractor::new(catalog);

    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        list_files(extractor.list_files(), cli.verbose);
        return Ok(());
    }

    let selected: Vec<(usize, ZipFileEntry)> = extractor
        .list_files()
        .iter()
        .enumerate()
        .filter(|(_, e)| is_selected(e, cli))
        .map(|(index, e)| (index, e.clone()))
        .collect();

    let multiple_files = cli.pipe && selected.len() > 1;
    let mut failures = 0usize;
    for (index, entry) in &selected {
        let result = if cli.test {
            test_file(&mut extractor, *index, entry, cli)
        } else {
            extract_file(&mut extractor, *index, entry, cli, multiple_files)
        };
        if let Err(err) = result {
            failures += 1;
            if !cli.is_very_quiet() {
                eprintln!("error: {}: {:#}", entry.file_name, err);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} entries failed", failures, selected.len());
    }
    if cli.test && !cli.is_quiet() {
        println!("No errors detected in compressed data of {}.", cli.file);
    }
    Ok(())
}

/// Apply the positional file filters and the `-x` exclusions.
///
/// Directory entries are only extracted when the whole archive is and
/// paths are kept.
fn is_selected(e: &ZipFileEntry, cli: &Cli) -> bool {
    if e.is_directory {
        if cli.junk_paths || cli.pipe || cli.test || !cli.files.is_empty() {
            return false;
        }
    } else if !cli.files.is_empty() {
        // If specific files are requested via positional arguments,
        // only include entries that match
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, &e.file_name)
            } else {
                // No wildcards: exact match on filename or full path
                let basename = Path::new(&e.file_name)
                    .file_name()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                e.file_name == *f || basename == *f
            }
        });
        if !matches {
            return false;
        }
    }

    // Exclude files matching the -x patterns
    !cli
        .exclude
        .iter()
        .any(|x| e.file_name.contains(x) || glob_match(x, &e.file_name))
}

/// List files in the ZIP archive.
///
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
fn list_files(entries: &[ZipFileEntry], verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  {:>3}  Name",
            "Length", "Size", "Cmpr", "Date", "Time", "Enc"
        );
        println!("{}", "-".repeat(75));
    }

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !verbose {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        let encrypted = if entry.is_encrypted() { "*" } else { "" };

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {:>3}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            encrypted,
            entry.file_name
        );

        // Accumulate totals (excluding directories)
        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(75));
        println!(
            "{:>10}  {:>10}  {}  {:>26}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Compression ratio as percentage saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Decode one entry without writing it.
fn test_file(
    extractor: &mut ZipExtractor,
    index: usize,
    entry: &ZipFileEntry,
    cli: &Cli,
) -> Result<()> {
    let outcome = extractor.test_entry(index)?;
    if !cli.is_quiet() {
        let note = if outcome.authenticated { " (authenticated)" } else { "" };
        println!("    testing: {:<40} OK{}", entry.file_name, note);
    }
    Ok(())
}

/// Extract a single file from the archive.
///
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in archive
/// - Overwrite control (`-n`, `-o`): Handle existing files
fn extract_file(
    extractor: &mut ZipExtractor,
    index: usize,
    entry: &ZipFileEntry,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    // Pipe mode: write file contents directly to stdout
    if cli.pipe {
        if show_filename {
            let mut stdout = std::io::stdout();
            stdout.write_all(format!("--- {} ---\n", entry.file_name).as_bytes())?;
        }
        extractor.extract_to_stdout(index)?;
        return Ok(());
    }

    let file_name = if cli.junk_paths {
        Path::new(&entry.file_name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&entry.file_name))
    } else {
        sanitize_path(&entry.file_name)
    };
    if file_name.as_os_str().is_empty() {
        bail!("refusing to extract to an empty path");
    }
    let output_path = match &cli.extract_dir {
        Some(dir) => PathBuf::from(dir).join(&file_name),
        None => file_name,
    };

    // Handle existing files based on overwrite options
    if output_path.exists() && !entry.is_directory {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.file_name);
            }
            return Ok(());
        }

        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.file_name);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        let action = if entry.is_directory { "creating" } else { "extracting" };
        println!("  {:>10}: {}", action, entry.file_name);
    }

    extractor.extract_to_file(index, &output_path)?;
    Ok(())
}

/// Keep only the normal components of an archive path, so entries cannot
/// escape the extraction directory.
fn sanitize_path(name: &str) -> PathBuf {
    Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// ```ignore
/// assert!(glob_match("*.txt", "readme.txt"));
/// assert!(glob_match("file?.dat", "file1.dat"));
/// assert!(!glob_match("*.txt", "readme.md"));
/// ```
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero or more characters
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(!glob_match("file?.dat", "file10.dat"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn test_sanitize_path_drops_escapes() {
        assert_eq!(sanitize_path("../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(sanitize_path("/abs/file.txt"), PathBuf::from("abs/file.txt"));
        assert_eq!(sanitize_path("dir/./file.txt"), PathBuf::from("dir/file.txt"));
    }
}
