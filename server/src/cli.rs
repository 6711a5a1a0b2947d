use clap::Parser;
use guesthost_host::{
    DEFAULT_DEBUG_SOCKET, DebugForwardConfig, DisplayGeometry, HostConfig, HostError,
    LaunchSettings, StreamConfig, resolve_temp_dir,
};
use guesthost_stream::{DEFAULT_DEBUG_PORT, DEFAULT_PORT};
use guesthost_supervisor::LOADER_ENV;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "guesthost-server")]
#[command(about = "Run a guest container and stream its display over the network")]
#[command(disable_help_flag = true)]
pub struct Cli {
    /// Address to listen on
    #[arg(short = 'a', long, default_value = "0.0.0.0")]
    pub address: String,

    /// Streaming port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Display width in pixels
    #[arg(short = 'w', long, default_value_t = 1280)]
    pub width: u32,

    /// Display height in pixels
    #[arg(short = 'h', long, default_value_t = 720)]
    pub height: u32,

    /// Display density
    #[arg(short = 'd', long, default_value_t = 160)]
    pub dpi: u32,

    /// Base directory containing rootfs/ (default: current directory)
    #[arg(short = 'b', long)]
    pub base: Option<PathBuf>,

    /// Guest binary; its directory must also hold the loader
    #[arg(
        short = 'P',
        long = "guest-binary",
        visible_alias = "proot",
        default_value = "./libproot.so"
    )]
    pub guest_binary: PathBuf,

    /// Startup script (default: <base>/rootfs/run.sh)
    #[arg(short = 's', long)]
    pub script: Option<PathBuf>,

    /// Temp directory for the guest (default: $PROOT_TMP_DIR or <base>/tmp)
    #[arg(short = 't', long)]
    pub tmpdir: Option<PathBuf>,

    /// Debug forwarder address (default: the listen address)
    #[arg(short = 'A', long = "debug-address", visible_alias = "adb-address")]
    pub debug_address: Option<String>,

    /// Debug forwarder port, 0 disables it
    #[arg(
        short = 'D',
        long = "debug-port",
        visible_alias = "adb-port",
        default_value_t = DEFAULT_DEBUG_PORT
    )]
    pub debug_port: u16,

    /// Debug bridge socket inside the rootfs
    #[arg(
        short = 'S',
        long = "debug-socket",
        visible_alias = "adb-socket",
        default_value = DEFAULT_DEBUG_SOCKET
    )]
    pub debug_socket: PathBuf,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print help
    #[arg(short = '?', long, action = clap::ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,
}

impl Cli {
    pub fn host_config(&self) -> Result<HostConfig, HostError> {
        let base = match &self.base {
            Some(base) => base.clone(),
            None => std::env::current_dir()?,
        };
        let geometry = DisplayGeometry::new(self.width, self.height, self.dpi)?;
        let config = HostConfig::new(&base, geometry);

        let launch = LaunchSettings {
            guest_binary: self.guest_binary.clone(),
            startup_script: self
                .script
                .clone()
                .unwrap_or_else(|| config.default_startup_script()),
            temp_dir: resolve_temp_dir(self.tmpdir.as_deref(), &config.base_path),
            loader: inherited_loader(),
        };
        let stream = StreamConfig {
            address: self.address.clone(),
            port: self.port,
        };
        let debug = DebugForwardConfig {
            address: self
                .debug_address
                .clone()
                .unwrap_or_else(|| self.address.clone()),
            port: self.debug_port,
            guest_socket: self.debug_socket.clone(),
        };

        Ok(config
            .with_stream(stream)
            .with_debug(debug)
            .with_launch(launch))
    }
}

fn inherited_loader() -> Option<PathBuf> {
    std::env::var_os(LOADER_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use std::path::Path;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["guesthost-server"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["-b", "/srv/guest"]);
        assert_eq!(cli.address, "0.0.0.0");
        assert_eq!(cli.port, 5558);
        assert_eq!((cli.width, cli.height, cli.dpi), (1280, 720, 160));
        assert_eq!(cli.debug_port, 5555);
        assert!(!cli.verbose);

        let config = cli.host_config().unwrap();
        assert_eq!(config.base_path, PathBuf::from("/srv/guest"));
        let debug = config.debug.unwrap();
        assert_eq!(debug.address, "0.0.0.0");
        assert_eq!(debug.guest_socket, PathBuf::from("/dev/socket/adbd"));
        let launch = config.launch.unwrap();
        assert_eq!(launch.guest_binary, PathBuf::from("./libproot.so"));
        assert_eq!(
            launch.startup_script,
            PathBuf::from("/srv/guest/rootfs/run.sh")
        );
    }

    #[test]
    fn test_short_flags() {
        let cli = parse(&[
            "-a", "127.0.0.1", "-p", "6000", "-w", "800", "-h", "600", "-d", "240", "-b",
            "/srv/guest/", "-P", "/opt/guest/libproot.so", "-s", "/srv/init.sh", "-t",
            "/var/tmp/g", "-D", "0", "-v",
        ]);
        assert_eq!(cli.height, 600);
        assert!(cli.verbose);

        let config = cli.host_config().unwrap();
        assert_eq!(config.base_path, PathBuf::from("/srv/guest"));
        assert_eq!(config.geometry, DisplayGeometry::new(800, 600, 240).unwrap());
        assert_eq!(config.stream.as_ref().unwrap().port, 6000);
        assert_eq!(config.debug.as_ref().unwrap().address, "127.0.0.1");
        assert_eq!(config.debug.as_ref().unwrap().port, 0);
        let launch = config.launch.unwrap();
        assert_eq!(launch.startup_script, Path::new("/srv/init.sh"));
        assert_eq!(launch.temp_dir, Path::new("/var/tmp/g"));
    }

    #[test]
    fn test_legacy_aliases() {
        let cli = parse(&[
            "--proot",
            "/opt/p/libproot.so",
            "--adb-address",
            "10.0.0.2",
            "--adb-port",
            "5037",
            "--adb-socket",
            "/dev/socket/debug",
        ]);
        assert_eq!(cli.guest_binary, PathBuf::from("/opt/p/libproot.so"));
        assert_eq!(cli.debug_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(cli.debug_port, 5037);
        assert_eq!(cli.debug_socket, PathBuf::from("/dev/socket/debug"));
    }

    #[test]
    fn test_help_and_invalid_flags() {
        let err = Cli::try_parse_from(["guesthost-server", "-?"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Cli::try_parse_from(["guesthost-server", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);

        assert!(Cli::try_parse_from(["guesthost-server", "-p", "not-a-port"]).is_err());
    }

    #[test]
    fn test_zero_width_is_configuration_error() {
        let cli = parse(&["-b", "/srv/guest", "-w", "0"]);
        assert!(matches!(
            cli.host_config(),
            Err(HostError::Configuration(_))
        ));
    }

    #[test]
    fn test_oversize_width_is_configuration_error() {
        let cli = parse(&["-b", "/srv/guest", "-w", "3000000000"]);
        assert!(matches!(
            cli.host_config(),
            Err(HostError::Configuration(_))
        ));
    }

    #[test]
    fn test_prepared_layout_under_base() {
        let base = TempDir::new().unwrap();
        let base_arg = base.path().to_str().unwrap().to_string();
        let scratch = base.path().join("scratch");
        let scratch_arg = scratch.to_str().unwrap().to_string();

        let cli = parse(&["-b", &base_arg, "-t", &scratch_arg]);
        let config = cli.host_config().unwrap();
        assert!(matches!(
            config.prepare_layout(),
            Err(HostError::Configuration(_))
        ));

        std::fs::create_dir(base.path().join("rootfs")).unwrap();
        config.prepare_layout().unwrap();
        assert!(scratch.is_dir());
        assert!(base.path().join("rootfs/tmp").is_dir());
    }
}
