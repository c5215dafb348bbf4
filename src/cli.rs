use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "streamzip")]
#[command(version)]
#[command(about = "A single-pass unzip with AES authentication, split archive and HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  streamzip data1.zip -x joe        extract all files except joe from data1.zip\n  \
  streamzip -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  streamzip -P secret -t vault.zip  test an AES-encrypted archive\n  \
  streamzip backup.z01              extract backup.z01, backup.z02, ..., backup.zip\n  \
  streamzip -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// ZIP file path, first volume of a split archive, or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Test archive files (decode and verify, write nothing)
    #[arg(short = 't')]
    pub test: bool,

    /// Password for encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default `env_logger` filter; `RUST_LOG` takes precedence.
    pub fn log_filter(&self) -> &'static str {
        if self.is_very_quiet() {
            "off"
        } else if self.is_quiet() {
            "error"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_password_and_test_flags() {
        let cli = Cli::try_parse_from(["streamzip", "-t", "-P", "secret", "vault.zip"]).unwrap();
        assert!(cli.test);
        assert_eq!(cli.password.as_deref(), Some("secret"));
        assert_eq!(cli.file, "vault.zip");
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_pipe_is_quiet() {
        let cli = Cli::try_parse_from(["streamzip", "-p", "a.zip", "x.txt"]).unwrap();
        assert!(cli.is_quiet());
        assert_eq!(cli.files, vec!["x.txt".to_string()]);
        assert_eq!(cli.log_filter(), "error");
    }
}
