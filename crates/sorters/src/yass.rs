//! Yass adapter
//!
//! Yass is a Python CLI driven by a YAML config. `prepare` lays down the
//! probe geometry, the raw int16 traces and the config; `launch` runs
//! `yass sort` and converts its native spike train into the `firings.json`
//! export the rest of the pipeline understands.

use crate::firings::read_firings;
use async_trait::async_trait;
use spikerun_shared_types::{RecordingView, SortingResult};
use spikerun_sorter_abstraction::{
    ParallelCompat, ParamSchema, Result, ShellRunner, SorterAdapter, SorterCapabilities,
    SorterError, SorterParams,
};
use std::path::Path;
use tracing::debug;

pub const GEOMETRY_FILE: &str = "geom.txt";
pub const DATA_FILE: &str = "data.bin";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default)]
pub struct YassSorter;

impl YassSorter {
    pub fn new() -> Self {
        Self
    }

    fn config_yaml(view: &RecordingView, output_dir: &Path) -> String {
        format!(
            "data:\n\
             \x20 root_folder: {dir}\n\
             \x20 recordings: {data}\n\
             \x20 geometry: {geometry}\n\
             resources:\n\
             \x20 max_memory: 2GB\n\
             \x20 processes: 1\n\
             recordings:\n\
             \x20 dtype: int16\n\
             \x20 sampling_rate: {fs}\n\
             \x20 n_channels: {nchan}\n\
             \x20 spatial_radius: 70\n\
             \x20 spike_size_ms: 1.5\n",
            dir = output_dir.display(),
            data = DATA_FILE,
            geometry = GEOMETRY_FILE,
            fs = view.sampling_frequency(),
            nchan = view.num_channels(),
        )
    }

    fn geometry(view: &RecordingView) -> Result<String> {
        let locations = view.locations().ok_or_else(|| {
            SorterError::Configuration(
                "channel locations are required to write the Yass geometry".to_string(),
            )
        })?;
        Ok(locations
            .iter()
            .map(|l| format!("{} {}\n", l[0], l[1]))
            .collect())
    }

    fn launch_body(output_dir: &Path) -> String {
        format!(
            "cd \"{dir}\"\n\
             yass sort {config}\n\
             python - <<'PYEOF'\n\
             import json\n\
             import numpy as np\n\
             \n\
             spikes = np.load(\"tmp/spike_train.npy\")\n\
             units = []\n\
             for unit_id in sorted(set(spikes[:, 1].tolist())):\n\
             \x20   train = spikes[spikes[:, 1] == unit_id, 0]\n\
             \x20   units.append({{\"unit_id\": int(unit_id), \"spike_train\": [int(t) for t in train]}})\n\
             json.dump({{\"units\": units}}, open(\"firings.json\", \"w\"))\n\
             PYEOF\n",
            dir = output_dir.display(),
            config = CONFIG_FILE,
        )
    }
}

#[async_trait]
impl SorterAdapter for YassSorter {
    fn name(&self) -> &'static str {
        "yass"
    }

    fn description(&self) -> &'static str {
        "Yass: neural network based spike sorting for dense MEAs"
    }

    fn installation_help(&self) -> &'static str {
        "Install with 'pip install yass-algorithm' so the yass CLI is on PATH"
    }

    fn is_installed(&self) -> bool {
        std::process::Command::new("yass")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn version(&self) -> String {
        let output = std::process::Command::new("yass").arg("--version").output();
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string(),
            _ => "unknown".to_string(),
        }
    }

    fn capabilities(&self) -> SorterCapabilities {
        SorterCapabilities {
            requires_locations: true,
            parallel: ParallelCompat::default(),
        }
    }

    // Yass reads everything from its YAML config; no tunable options are
    // exposed through the parameter schema.
    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn prepare(
        &self,
        view: &RecordingView,
        _params: &mut SorterParams,
        output_dir: &Path,
    ) -> Result<()> {
        tokio::fs::write(output_dir.join(GEOMETRY_FILE), Self::geometry(view)?).await?;
        view.write_binary(&output_dir.join(DATA_FILE)).await?;
        tokio::fs::write(
            output_dir.join(CONFIG_FILE),
            Self::config_yaml(view, output_dir),
        )
        .await?;

        debug!("Yass inputs staged in {}", output_dir.display());
        Ok(())
    }

    async fn launch(&self, _view: &RecordingView, output_dir: &Path) -> Result<()> {
        let runner = ShellRunner::new(output_dir, self.name(), &self.log_file_name());
        let code = runner.run(&Self::launch_body(output_dir)).await?;
        if code != 0 {
            return Err(SorterError::execution(
                format!("yass returned exit code {code}"),
                runner.log_path(),
            ));
        }
        Ok(())
    }

    fn parse_results(&self, output_dir: &Path) -> Result<SortingResult> {
        read_firings(output_dir, false)
    }
}
