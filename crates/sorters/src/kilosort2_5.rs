//! Kilosort 2.5 adapter

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

const ENTRY_POINTS: &[&str] = &["master_kilosort.m", "main_kilosort.m"];

/// The drift-corrected 2.5 release of Kilosort, driven through headless
/// MATLAB.
#[derive(Debug, Clone)]
pub struct Kilosort25Sorter {
    config: KilosortConfig,
}

impl Kilosort25Sorter {
    pub fn new(config: KilosortConfig) -> Self {
        Self { config }
    }

    /// Install path from the `KILOSORT2_5_PATH` environment variable.
    pub fn from_env() -> Self {
        Self::new(KilosortConfig::from_env("KILOSORT2_5_PATH"))
    }

    fn pipeline() -> &'static str {
        "    rez = preprocessDataSub(ops);\n\
         \x20   rez = datashift2(rez, 1);\n\
         \x20   rez = learnAndSolve8b(rez, 1);\n\
         \x20   rez = find_merges(rez, 1);\n\
         \x20   rez = splitAllClusters(rez, 1);\n\
         \x20   rez = set_cutoff(rez);\n\
         \x20   rez.good = get_good_units(rez);\n"
    }
}

#[async_trait]
impl SorterAdapter for Kilosort25Sorter {
    fn name(&self) -> &'static str {
        "kilosort2_5"
    }

    fn description(&self) -> &'static str {
        "Kilosort 2.5: template matching with drift correction, runs on MATLAB with a GPU"
    }

    fn installation_help(&self) -> &'static str {
        "Clone https://github.com/MouseLand/Kilosort, check out the 2.5 \
         release, compile the CUDA mex files and point KILOSORT2_5_PATH at \
         the checkout"
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
                json!([10, 4]),
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
                0.1,
                "Minimum spike rate (Hz); clusters falling below it get removed",
            )
            .with(
                "minfr_goodchannels",
                0.1,
                "Minimum firing rate on a 'good' channel",
            )
            .with(
                "nblocks",
                5,
                "Blocks for registration; 0 turns it off, 1 does rigid registration",
            )
            .with("sig", 20, "Spatial smoothness constant for registration")
            .with("freq_min", 150, "High-pass filter cutoff frequency")
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

        debug!("Kilosort 2.5 inputs staged in {}", output_dir.display());
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
