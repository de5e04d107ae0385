use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sc64deck_core::models::OperationRequest;

#[derive(Parser, Debug)]
#[command(
    name = "sc64deck",
    version,
    about = "Manage the SD card of an SC64 flash cartridge through sc64deployer",
    after_help = "EXAMPLES:\n  List the card root:      sc64deck ls /\n  Upload a ROM:            sc64deck upload ./game.z64 /Games/game.z64\n  Serve JSON-RPC on stdio: sc64deck stdio"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(
        long,
        global = true,
        help = "Path to the sc64deployer executable\nOverrides SC64_DEPLOYER and the config file"
    )]
    pub deployer: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "JSON configuration file [default: <config dir>/sc64deck/config.json]"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Print results as JSON")]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List a directory on the SD card
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Copy a local file onto the SD card
    Upload { local: PathBuf, remote: String },
    /// Copy a file from the SD card to the local disk
    Download { remote: String, local: PathBuf },
    /// Delete a file or an empty directory
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Rename an entry within its directory
    Mv { path: String, new_name: String },
    /// Show the tool's status line for a path
    Stat { path: String },
    /// Serve the operation API as JSON-RPC over stdin/stdout
    Stdio,
}

impl Command {
    /// The operation this command submits, or `None` for `stdio`.
    pub fn to_request(&self) -> Option<OperationRequest> {
        let request = match self {
            Self::Ls { path } => OperationRequest::list(path.as_str()),
            Self::Upload { local, remote } => OperationRequest::upload(local, remote.as_str()),
            Self::Download { remote, local } => OperationRequest::download(remote.as_str(), local),
            Self::Rm { path } => OperationRequest::delete(path.as_str()),
            Self::Mkdir { path } => OperationRequest::mkdir(path.as_str()),
            Self::Mv { path, new_name } => {
                OperationRequest::rename(path.as_str(), new_name.as_str())
            }
            Self::Stat { path } => OperationRequest::stat(path.as_str()),
            Self::Stdio => return None,
        };
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc64deck_core::models::OperationKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sc64deck").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn ls_defaults_to_root() {
        let cli = parse(&["ls"]);
        assert_eq!(cli.command, Command::Ls { path: "/".into() });
        let request = cli.command.to_request().unwrap();
        assert_eq!(request.kind, OperationKind::List);
        assert_eq!(request.target_path, "/");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&[
            "upload",
            "rom.z64",
            "/Games/rom.z64",
            "--deployer",
            "/opt/sc64deployer",
            "--json",
        ]);
        assert_eq!(cli.deployer, Some(PathBuf::from("/opt/sc64deployer")));
        assert!(cli.json);
        let request = cli.command.to_request().unwrap();
        assert_eq!(request.kind, OperationKind::Upload);
        assert_eq!(request.local_path, Some(PathBuf::from("rom.z64")));
        assert_eq!(request.target_path, "/Games/rom.z64");
    }

    #[test]
    fn mv_carries_new_name() {
        let request = parse(&["mv", "/Games/a.z64", "b.z64"])
            .command
            .to_request()
            .unwrap();
        assert_eq!(request.kind, OperationKind::Rename);
        assert_eq!(request.new_name.as_deref(), Some("b.z64"));
    }

    #[test]
    fn stdio_has_no_request() {
        assert_eq!(parse(&["stdio"]).command.to_request(), None);
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["sc64deck", "rm"]).is_err());
        assert!(Cli::try_parse_from(["sc64deck"]).is_err());
    }
}
