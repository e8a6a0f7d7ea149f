//! Kilosort 3 adapter

use crate::firings::{keep_good_only_from_params, read_firings};
use crate::kilosort::{
    KilosortConfig, RECORDING_FILE, channel_map_script, launch_script, master_script,
    normalize_batch_size, ops_script,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use spikerun_shared_types::{RecordingView, SortingResult};
use spikerun_sorter_abstraction::{
    ParamSchema, Result, ShellRunner, SorterAdapter, SorterCapabilities, SorterError, SorterParams,
};
use std::path::Path;
use tracing::debug;

const ENTRY_POINTS: &[&str] = &["main_kilosort3.m", "master_kilosort3.m"];

/// Kilosort 3, driven through headless MATLAB.
#[derive(Debug, Clone)]
pub struct Kilosort3Sorter {
    config: KilosortConfig,
}

impl Kilosort3Sorter {
    pub fn new(config: KilosortConfig) -> Self {
        Self { config }
    }

    /// Install path from the `KILOSORT3_PATH` environment variable.
    pub fn from_env() -> Self {
        Self::new(KilosortConfig::from_env("KILOSORT3_PATH"))
    }

    fn pipeline() -> &'static str {
        "    rez = preprocessDataSub(ops);\n\
         \x20   rez = datashift2(rez, 1);\n\
         \x20   [rez, st3, tF] = extract_spikes(rez);\n\
         \x20   rez = template_learning(rez, tF, st3);\n\
         \x20   [rez, st3, tF] = trackAndSort(rez);\n\
         \x20   rez = final_clustering(rez, tF, st3);\n\
         \x20   rez = find_merges(rez, 1);\n\
         \x20   rez.good = get_good_units(rez);\n"
    }
}

#[async_trait]
impl SorterAdapter for Kilosort3Sorter {
    fn name(&self) -> &'static str {
        "kilosort3"
    }

    fn description(&self) -> &'static str {
        "Kilosort 3: spike sorting with clustering-based drift tracking, runs on MATLAB with a GPU"
    }

    fn installation_help(&self) -> &'static str {
        "Clone https://github.com/MouseLand/Kilosort, compile the CUDA mex \
         files and point KILOSORT3_PATH at the checkout"
    }

    fn is_installed(&self) -> bool {
        self.config.is_installed(ENTRY_POINTS)
    }

    fn version(&self) -> String {
        self.config.version()
    }

    fn capabilities(&self) -> SorterCapabilities {
        SorterCapabilities::default()
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .with("detect_threshold", 6, "Threshold for spike detection")
            .with(
                "projection_threshold",
                json!([9, 9]),
                "Threshold on projections",
            )
            .with(
                "preclust_threshold",
                8,
                "Threshold crossings for pre-clustering (in PCA projection space)",
            )
            .with("car", true, "Enable or disable common reference")
            .with(
                "minFR",
                0.2,
                "Minimum spike rate (Hz); clusters falling below it get removed",
            )
            .with(
                "minfr_goodchannels",
                0.2,
                "Minimum firing rate on a 'good' channel",
            )
            .with(
                "nblocks",
                5,
                "Blocks for registration; 0 turns it off, 1 does rigid registration",
            )
            .with("sig", 20, "Spatial smoothness constant for registration")
            .with("freq_min", 300, "High-pass filter cutoff frequency")
            .with(
                "sigmaMask",
                30,
                "Spatial constant in um for computing residual variance of spike",
            )
            .with("nPCs", 3, "Number of PCA dimensions")
            .with(
                "ntbuff",
                64,
                "Samples of symmetrical buffer for whitening and spike detection",
            )
            .with(
                "nfilt_factor",
                4,
                "Max number of clusters per good channel, even temporary ones",
            )
            .with(
                "NT",
                Value::Null,
                "Batch size (computed automatically when unset)",
            )
            .with("keep_good_only", false, "If true only 'good' units are returned")
    }

    async fn prepare(
        &self,
        view: &RecordingView,
        params: &mut SorterParams,
        output_dir: &Path,
    ) -> Result<()> {
        let install_path = self.config.require_install_path()?;
        normalize_batch_size(params);

        view.write_binary(&output_dir.join(RECORDING_FILE)).await?;
        tokio::fs::write(
            output_dir.join(format!("{}_channelmap.m", self.name())),
            channel_map_script(view)?,
        )
        .await?;
        tokio::fs::write(
            output_dir.join(format!("{}_config.m", self.name())),
            ops_script(view, params)?,
        )
        .await?;
        tokio::fs::write(
            output_dir.join(format!("{}_master.m", self.name())),
            master_script(self.name(), install_path, output_dir, Self::pipeline()),
        )
        .await?;

        debug!("Kilosort 3 inputs staged in {}", output_dir.display());
        Ok(())
    }

    async fn launch(&self, _view: &RecordingView, output_dir: &Path) -> Result<()> {
        let runner = ShellRunner::new(output_dir, self.name(), &self.log_file_name());
        let code = runner.run(&launch_script(self.name(), output_dir)).await?;
        if code != 0 {
            return Err(SorterError::execution(
                format!("{} returned exit code {code}", self.name()),
                runner.log_path(),
            ));
        }
        Ok(())
    }

    fn parse_results(&self, output_dir: &Path) -> Result<SortingResult> {
        read_firings(output_dir, keep_good_only_from_params(output_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikerun_shared_types::Recording;
    use std::sync::Arc;

    #[tokio::test]
    async fn prepare_renders_the_version_3_pipeline() {
        let install = tempfile::tempdir().unwrap();
        std::fs::write(install.path().join("main_kilosort3.m"), "").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let view = RecordingView::full(Arc::new(
            Recording::in_memory(vec![vec![0i16; 64]; 2], 30_000.0)
                .with_locations(&[[0.0, 0.0], [0.0, 20.0]]),
        ));
        let sorter = Kilosort3Sorter::new(KilosortConfig::new(install.path()));
        let mut params = sorter.param_schema().defaults();
        sorter.prepare(&view, &mut params, dir.path()).await.unwrap();

        let config = std::fs::read_to_string(dir.path().join("kilosort3_config.m")).unwrap();
        assert!(config.contains("ops.Th = [9, 9];"));
        assert!(config.contains("ops.fshigh = 300;"));
        assert!(config.contains("ops.minFR = 0.2;"));

        let master = std::fs::read_to_string(dir.path().join("kilosort3_master.m")).unwrap();
        assert!(master.contains("template_learning"));
        assert!(master.contains("trackAndSort"));
        assert!(master.contains("kilosort3_channelmap.m"));
    }
}
