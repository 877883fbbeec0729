//! Container engine backed cluster driver
//!
//! Each node is one container on a per-run network. Images for local server
//! directories are built on first use and removed again by
//! [`ClusterDriver::release_artifacts`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::{RunSettings, VersionReference};
use crate::driver::{ClusterDriver, ClusterHandle, DriverError, NodeHandle, RunSide};

/// Log line printed by the server once its endpoints accept requests
pub const READY_MARKER: &str = "ISPN080001";

/// Label attached to every container, volume and image of a run
pub const RUN_LABEL: &str = "rolling-upgrade.run";

/// Interval between readiness checks while a node boots
const READINESS_POLL: Duration = Duration::from_secs(1);

/// Drives one server version through a container engine CLI
pub struct ContainerDriver {
    settings: RunSettings,
    version: VersionReference,
    side: RunSide,
    run_id: String,
    image: OnceCell<String>,
    network: OnceCell<String>,
    built_image: Mutex<Option<String>>,
    volumes: Mutex<BTreeSet<String>>,
}

impl ContainerDriver {
    pub fn new(
        settings: RunSettings,
        version: VersionReference,
        side: RunSide,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            version,
            side,
            run_id: run_id.into(),
            image: OnceCell::new(),
            network: OnceCell::new(),
            built_image: Mutex::new(None),
            volumes: Mutex::new(BTreeSet::new()),
        }
    }

    /// Version this driver runs
    pub fn version(&self) -> &VersionReference {
        &self.version
    }

    fn engine(&self) -> &str {
        &self.settings.server.engine
    }

    /// Network name shared by both sides of the run
    pub fn network_name(&self) -> String {
        format!("{}-{}", self.settings.server.network, self.run_id)
    }

    /// Resolve the image to run, building it from a directory the first time
    async fn image(&self) -> Result<&str, DriverError> {
        let image = self
            .image
            .get_or_try_init(|| async {
                let name = image_name(&self.settings, &self.version, self.side);
                if let Some(dir) = self.version.directory() {
                    self.build_image(dir, &name).await?;
                    *self.built_image.lock().await = Some(name.clone());
                }
                Ok::<_, DriverError>(name)
            })
            .await?;
        Ok(image.as_str())
    }

    async fn build_image(&self, dir: &Path, tag: &str) -> Result<(), DriverError> {
        info!(image = %tag, directory = %dir.display(), "Building server image from local directory");
        let dir = dir.to_string_lossy().to_string();
        let label = format!("{}={}", RUN_LABEL, self.run_id);
        let args = ["build", "-t", tag, "--label", label.as_str(), "-f", "-", dir.as_str()];
        self.run_with_input(&args, &dockerfile(&self.settings)).await?;
        Ok(())
    }

    async fn ensure_network(&self) -> Result<&str, DriverError> {
        let network = self
            .network
            .get_or_try_init(|| async {
                let name = self.network_name();
                let label = format!("{}={}", RUN_LABEL, self.run_id);
                match self
                    .run(&["network", "create", "--label", label.as_str(), name.as_str()])
                    .await
                {
                    Ok(_) => debug!(network = %name, "Created network"),
                    // The other side of the run may have created it already
                    Err(DriverError::CommandFailed { ref stderr, .. }) if is_already_exists(stderr) => {}
                    Err(e) => return Err(e),
                }
                Ok(name)
            })
            .await?;
        Ok(network.as_str())
    }

    /// Start the next node of `handle`.
    ///
    /// The node is registered before the container is created, so a node that
    /// never comes up is still exported by failure handlers and removed by
    /// [`ClusterDriver::release_cluster`].
    async fn start_node(&self, handle: &mut ClusterHandle, data_slot: usize) -> Result<(), DriverError> {
        let image = self.image().await?;
        let network = self.ensure_network().await?;
        let index = handle.next_index();
        let name = container_name(&self.run_id, handle.site(), self.side, index);

        let volume = if handle.spec().shared_data_mount {
            let volume = volume_name(&self.run_id, handle.site(), data_slot);
            self.volumes.lock().await.insert(volume.clone());
            Some(volume)
        } else {
            None
        };

        let args = run_args(&RunArgs {
            settings: &self.settings,
            handle,
            run_id: &self.run_id,
            name: &name,
            network,
            image,
            volume: volume.as_deref(),
        });

        handle.push(NodeHandle::new(index, self.version.clone(), name.as_str(), "", data_slot));
        match self.boot(&args, &name).await {
            Ok(address) => {
                debug!(node = %name, address = %address, "Node ready");
                if let Some(node) = handle.node_mut(index) {
                    node.address = address;
                }
                Ok(())
            }
            Err(e) => {
                // Not serving, but the container stays until release
                if let Some(node) = handle.node_mut(index) {
                    node.mark_stopped();
                }
                Err(e)
            }
        }
    }

    /// Create the container and wait for it to serve, returning its address
    async fn boot(&self, args: &[String], name: &str) -> Result<String, DriverError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args).await?;
        self.wait_ready(name).await?;
        self.address_of(name).await
    }

    async fn wait_ready(&self, name: &str) -> Result<(), DriverError> {
        let timeout = self.settings.server.startup_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let logs = self.run(&["logs", name]).await?;
            if logs.contains(READY_MARKER) {
                return Ok(());
            }
            let running = self
                .run(&["inspect", "-f", "{{.State.Running}}", name])
                .await?;
            if running.trim() != "true" {
                return Err(DriverError::NodeExited {
                    name: name.to_string(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::StartupTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    }

    async fn address_of(&self, name: &str) -> Result<String, DriverError> {
        let output = self
            .run(&[
                "inspect",
                "-f",
                "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}",
                name,
            ])
            .await?;
        output
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| DriverError::MissingAddress {
                name: name.to_string(),
            })
    }

    /// Run a removal command, tolerating an object that is already gone
    async fn remove_quietly(&self, args: &[&str]) -> Result<(), DriverError> {
        match self.run(args).await {
            Ok(_) => Ok(()),
            Err(DriverError::CommandFailed { ref stderr, .. }) if is_missing_object(stderr) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run an engine command, returning stdout
    async fn run(&self, args: &[&str]) -> Result<String, DriverError> {
        debug!(command = %render(self.engine(), args), "Running container engine command");
        let output = Command::new(self.engine())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DriverError::Spawn {
                engine: self.engine().to_string(),
                source,
            })?;
        command_output(self.engine(), args, output)
    }

    async fn run_with_input(&self, args: &[&str], input: &str) -> Result<String, DriverError> {
        debug!(command = %render(self.engine(), args), "Running container engine command");
        let mut child = Command::new(self.engine())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DriverError::Spawn {
                engine: self.engine().to_string(),
                source,
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        command_output(self.engine(), args, output)
    }
}

#[async_trait]
impl ClusterDriver for ContainerDriver {
    async fn start_nodes(
        &self,
        handle: &mut ClusterHandle,
        data_slots: &[usize],
    ) -> Result<(), DriverError> {
        for &slot in data_slots {
            info!(
                site = %handle.site(),
                side = %self.side,
                version = %self.version,
                index = handle.next_index(),
                expected = handle.spec().expected_members,
                "Starting node"
            );
            self.start_node(handle, slot).await?;
        }
        Ok(())
    }

    async fn stop_node(&self, handle: &mut ClusterHandle, index: usize) -> Result<(), DriverError> {
        let node = handle.node(index).ok_or_else(|| handle.unknown_node(index))?;
        if !node.is_running() {
            return Ok(());
        }
        let name = node.name.clone();

        // Stopped containers are kept so their logs can still be exported
        match self.run(&["stop", name.as_str()]).await {
            Ok(_) => {}
            Err(DriverError::CommandFailed { ref stderr, .. }) if is_missing_object(stderr) => {
                debug!(node = %name, "Container already gone");
            }
            Err(e) => return Err(e),
        }
        if let Some(node) = handle.node_mut(index) {
            node.mark_stopped();
        }
        Ok(())
    }

    async fn export_files(
        &self,
        handle: &ClusterHandle,
        index: usize,
        fileset: &str,
        destination: &Path,
    ) -> Result<PathBuf, DriverError> {
        let node = handle.node(index).ok_or_else(|| handle.unknown_node(index))?;
        let target = export_directory(destination, handle.site(), handle.version(), index);
        tokio::fs::create_dir_all(&target).await?;

        let source = format!("{}:{}/.", node.name, self.settings.server.fileset_path(fileset));
        let target_str = target.to_string_lossy().to_string();
        self.run(&["cp", source.as_str(), target_str.as_str()]).await?;
        Ok(target)
    }

    async fn release_cluster(&self, handle: &mut ClusterHandle) -> Result<(), DriverError> {
        let names: Vec<(usize, String)> = handle
            .nodes()
            .iter()
            .map(|n| (n.index, n.name.clone()))
            .collect();
        let mut first_error = None;
        for (index, name) in names {
            match self.remove_quietly(&["rm", "-f", name.as_str()]).await {
                Ok(()) => {
                    if let Some(node) = handle.node_mut(index) {
                        node.mark_stopped();
                    }
                }
                Err(e) => {
                    warn!(node = %name, "Failed to remove container: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release_artifacts(&self) -> Result<(), DriverError> {
        let mut first_error = None;

        if let Some(image) = self.built_image.lock().await.take() {
            info!(image = %image, "Removing ephemeral image");
            if let Err(e) = self.remove_quietly(&["rmi", "-f", image.as_str()]).await {
                first_error.get_or_insert(e);
            }
        }

        let volumes = std::mem::take(&mut *self.volumes.lock().await);
        for volume in volumes {
            if let Err(e) = self.remove_quietly(&["volume", "rm", "-f", volume.as_str()]).await {
                warn!(volume = %volume, "Failed to remove volume: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(network) = self.network.get() {
            if let Err(e) = self.remove_quietly(&["network", "rm", network.as_str()]).await {
                warn!(network = %network, "Failed to remove network: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Container name of node `index` of one side of a site
pub fn container_name(run_id: &str, site: &str, side: RunSide, index: usize) -> String {
    format!("{}-{}-{}-{}", run_id, site, side, index)
}

/// Data volume shared by the old and new node occupying `slot`
pub fn volume_name(run_id: &str, site: &str, slot: usize) -> String {
    format!("{}-{}-data-{}", run_id, site, slot)
}

/// Image a version runs from
pub fn image_name(settings: &RunSettings, version: &VersionReference, side: RunSide) -> String {
    match version {
        VersionReference::Release(id) => format!("{}:{}", settings.server.image_repository, id),
        VersionReference::Image(name) => name.clone(),
        VersionReference::Directory(_) => format!("{}-{}", settings.server.snapshot_image, side),
    }
}

/// Where the files of one node land on the local filesystem
pub fn export_directory(
    destination: &Path,
    site: &str,
    version: &VersionReference,
    index: usize,
) -> PathBuf {
    destination.join(format!("{}-{}-{}", site, version.label(), index))
}

/// Build file used for images created from a server directory
pub fn dockerfile(settings: &RunSettings) -> String {
    let home = &settings.server.server_home;
    format!(
        "FROM {base}\nCOPY --chown=185:0 . {home}\nUSER 185\nWORKDIR {home}\nEXPOSE {port}\nENTRYPOINT [\"{home}/bin/server.sh\"]\n",
        base = settings.server.snapshot_base_image,
        home = home,
        port = settings.server.port,
    )
}

struct RunArgs<'a> {
    settings: &'a RunSettings,
    handle: &'a ClusterHandle,
    run_id: &'a str,
    name: &'a str,
    network: &'a str,
    image: &'a str,
    volume: Option<&'a str>,
}

fn run_args(args: &RunArgs<'_>) -> Vec<String> {
    let spec = args.handle.spec();
    let mut out = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        args.name.to_string(),
        "--hostname".to_string(),
        args.name.to_string(),
        "--network".to_string(),
        args.network.to_string(),
        "--label".to_string(),
        format!("{}={}", RUN_LABEL, args.run_id),
        "--label".to_string(),
        format!("rolling-upgrade.expected-members={}", spec.expected_members),
        "-e".to_string(),
        format!("USER={}", args.settings.credentials.username),
        "-e".to_string(),
        format!("PASS={}", args.settings.credentials.password),
    ];
    if let Some(volume) = args.volume {
        out.push("-v".to_string());
        out.push(format!("{}:{}", volume, args.settings.server.fileset_path("data")));
    }
    out.push(args.image.to_string());
    out.push(format!("-Dinfinispan.cluster.stack={}", spec.protocol));
    out.push(format!("-Dinfinispan.cluster.name={}", spec.site));
    out.push(format!("-Dinfinispan.node.name={}", args.name));
    out
}

fn command_output(
    engine: &str,
    args: &[&str],
    output: std::process::Output,
) -> Result<String, DriverError> {
    if !output.status.success() {
        return Err(DriverError::CommandFailed {
            command: render(engine, args),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    // Server logs go to stderr as well as stdout
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

fn render(engine: &str, args: &[&str]) -> String {
    let mut command = engine.to_string();
    for arg in args {
        command.push(' ');
        // Never echo credentials
        if arg.starts_with("PASS=") {
            command.push_str("PASS=<redacted>");
        } else {
            command.push_str(arg);
        }
    }
    command
}

/// True when the engine reports that the target object does not exist
pub fn is_missing_object(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such") || stderr.contains("no container with") || stderr.contains("not found")
}

fn is_already_exists(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("already exists")
}
