//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell as CompletionShell;

use kiln::core::{Os, Platform};
use kiln::util::ColorChoice;

/// Kiln - build, install and smoke-test software from recipes
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    pub color: ColorChoice,

    /// Output format for status messages
    #[arg(long, global = true, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch, patch, build, install and test a recipe
    Install(InstallArgs),

    /// Download and verify every artifact a recipe needs
    Fetch(FetchArgs),

    /// Run a recipe's acceptance test against an existing install
    Test(TestArgs),

    /// Show what a recipe would do on a platform
    Info(InfoArgs),

    /// Check upstream for a newer version
    Livecheck(LivecheckArgs),

    /// Manage the download cache
    Cache(CacheArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Platform overrides for predicate evaluation.
#[derive(Args, Clone, Default)]
pub struct PlatformArgs {
    /// Evaluate predicates for this OS instead of the host
    #[arg(long, value_name = "OS")]
    pub os: Option<Os>,

    /// OS version to assume (e.g. 10.15, 11.6)
    #[arg(long, value_name = "VERSION")]
    pub os_version: Option<String>,

    /// CPU architecture to assume
    #[arg(long, value_name = "ARCH")]
    pub arch: Option<String>,
}

impl PlatformArgs {
    /// The host platform with any overrides applied.
    ///
    /// Overriding the OS drops the host's OS version unless one is given.
    pub fn resolve(&self) -> Platform {
        let mut platform = Platform::current();
        if let Some(os) = self.os {
            if os != platform.os {
                platform.os_version = None;
            }
            platform.os = os;
        }
        if let Some(ref version) = self.os_version {
            platform.os_version = Some(version.clone());
        }
        if let Some(ref arch) = self.arch {
            platform.arch = arch.clone();
        }
        platform
    }
}

#[derive(Args)]
pub struct InstallArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Install prefix (default: <cellar>/<name>/<version>)
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// Keep the work directory after the run
    #[arg(long)]
    pub keep_work: bool,

    /// Skip the acceptance test
    #[arg(long)]
    pub no_test: bool,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Build driver for compile and install steps
    #[arg(long, env = "MAKE")]
    pub make: Option<String>,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

#[derive(Args)]
pub struct TestArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Install prefix to test (default: <cellar>/<name>/<version>)
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// Keep the scratch directory in this location
    #[arg(long, value_name = "DIR")]
    pub testpath: Option<PathBuf>,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

#[derive(Args)]
pub struct LivecheckArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show the cache directory
    Path,

    /// List cached downloads
    List,

    /// Remove every cached download
    Clean,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}
