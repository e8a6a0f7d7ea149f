//! Shared Kilosort plumbing
//!
//! Kilosort 2.5 and 3 differ in their MATLAB pipeline and default options
//! but share everything else: an install tree addressed by a
//! [`KilosortConfig`], the int16 `recording.dat` layout, the generated
//! channel map and `ops` config scripts, and the batch-size normalization
//! applied during prepare.

use serde_json::Value;
use spikerun_shared_types::RecordingView;
use spikerun_sorter_abstraction::{Result, SorterError, SorterParams};
use std::path::{Path, PathBuf};

/// Raw data file the generated config points Kilosort at.
pub const RECORDING_FILE: &str = "recording.dat";

/// Where a Kilosort checkout lives.
///
/// Constructed explicitly, or from an environment variable for the common
/// "export KILOSORT3_PATH=..." setup.
#[derive(Debug, Clone, Default)]
pub struct KilosortConfig {
    pub install_path: Option<PathBuf>,
}

impl KilosortConfig {
    pub fn new(install_path: impl Into<PathBuf>) -> Self {
        Self {
            install_path: Some(install_path.into()),
        }
    }

    pub fn from_env(var: &str) -> Self {
        Self {
            install_path: std::env::var_os(var).map(PathBuf::from),
        }
    }

    /// The checkout counts as installed when any of the given entry-point
    /// scripts exists in it.
    pub fn is_installed(&self, entry_points: &[&str]) -> bool {
        self.install_path
            .as_ref()
            .is_some_and(|path| entry_points.iter().any(|m| path.join(m).is_file()))
    }

    /// `git-<short commit>` of the checkout, `"unknown"` when it is not a
    /// git tree or git is unavailable.
    pub fn version(&self) -> String {
        let Some(path) = &self.install_path else {
            return "unknown".to_string();
        };
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["rev-parse", "--short", "HEAD"])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let commit = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if commit.is_empty() {
                    "unknown".to_string()
                } else {
                    format!("git-{commit}")
                }
            }
            _ => "unknown".to_string(),
        }
    }

    pub fn require_install_path(&self) -> Result<&Path> {
        self.install_path.as_deref().ok_or_else(|| {
            SorterError::Installation("no Kilosort install path configured".to_string())
        })
    }
}

/// Default `NT` when unset is `64*1024 + ntbuff`; an explicit value is
/// clamped down to a multiple of 32, the batch granularity Kilosort needs.
pub fn normalize_batch_size(params: &mut SorterParams) {
    let ntbuff = params.get_u64("ntbuff").unwrap_or(64);
    match params.get_u64("NT") {
        None => params.set("NT", 64 * 1024 + ntbuff),
        Some(nt) => params.set("NT", nt / 32 * 32),
    }
}

/// Render a JSON parameter value as a MATLAB expression.
pub fn matlab_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(matlab_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::String(s) => format!("'{s}'"),
        Value::Null => "[]".to_string(),
        Value::Object(_) => "[]".to_string(),
    }
}

fn ops_value(params: &SorterParams, key: &str) -> Result<String> {
    params.get(key).map(matlab_value).ok_or_else(|| {
        SorterError::Configuration(format!("missing sorter parameter '{key}'"))
    })
}

/// Generated `<name>_channelmap.m`: builds and saves `chanMap.mat` from the
/// view's channel coordinates.
pub fn channel_map_script(view: &RecordingView) -> Result<String> {
    let locations = view.locations().ok_or_else(|| {
        SorterError::Configuration(
            "channel locations are required to build the Kilosort channel map".to_string(),
        )
    })?;
    let xcoords: Vec<String> = locations.iter().map(|l| l[0].to_string()).collect();
    let ycoords: Vec<String> = locations.iter().map(|l| l[1].to_string()).collect();

    Ok(format!(
        "Nchannels = {nchan};\n\
         connected = true(Nchannels, 1);\n\
         chanMap = 1:Nchannels;\n\
         chanMap0ind = chanMap - 1;\n\
         xcoords = [{xcoords}];\n\
         ycoords = [{ycoords}];\n\
         kcoords = ones(Nchannels, 1);\n\
         fs = {fs};\n\
         save(fullfile(fpath, 'chanMap.mat'), ...\n\
         \x20   'chanMap', 'chanMap0ind', 'connected', 'xcoords', 'ycoords', 'kcoords', 'fs');\n",
        nchan = view.num_channels(),
        xcoords = xcoords.join(", "),
        ycoords = ycoords.join(", "),
        fs = view.sampling_frequency(),
    ))
}

/// Generated `<name>_config.m`: the `ops` struct driving the pipeline.
pub fn ops_script(view: &RecordingView, params: &SorterParams) -> Result<String> {
    Ok(format!(
        "ops.NchanTOT = {nchan};\n\
         ops.fs = {fs};\n\
         ops.fbinary = fullfile(fpath, '{recording}');\n\
         ops.fproc = fullfile(fpath, 'temp_wh.dat');\n\
         ops.trange = [0 Inf];\n\
         ops.chanMap = fullfile(fpath, 'chanMap.mat');\n\
         \n\
         ops.fshigh = {freq_min};\n\
         ops.minfr_goodchannels = {minfr_goodchannels};\n\
         ops.Th = {projection_threshold};\n\
         ops.lam = 10;\n\
         ops.AUCsplit = 0.9;\n\
         ops.minFR = {min_fr};\n\
         ops.momentum = [20 400];\n\
         ops.sigmaMask = {sigma_mask};\n\
         ops.ThPre = {preclust_threshold};\n\
         ops.sig = {sig};\n\
         ops.nblocks = {nblocks};\n\
         ops.spkTh = -{detect_threshold};\n\
         ops.CAR = {car};\n\
         ops.reorder = 1;\n\
         ops.nskip = 25;\n\
         ops.GPU = 1;\n\
         ops.nfilt_factor = {nfilt_factor};\n\
         ops.ntbuff = {ntbuff};\n\
         ops.NT = {nt};\n\
         ops.whiteningRange = 32;\n\
         ops.nSkipCov = 25;\n\
         ops.scaleproc = 200;\n\
         ops.nPCs = {n_pcs};\n\
         ops.useRAM = 0;\n",
        nchan = view.num_channels(),
        fs = view.sampling_frequency(),
        recording = RECORDING_FILE,
        freq_min = ops_value(params, "freq_min")?,
        minfr_goodchannels = ops_value(params, "minfr_goodchannels")?,
        projection_threshold = ops_value(params, "projection_threshold")?,
        min_fr = ops_value(params, "minFR")?,
        sigma_mask = ops_value(params, "sigmaMask")?,
        preclust_threshold = ops_value(params, "preclust_threshold")?,
        sig = ops_value(params, "sig")?,
        nblocks = ops_value(params, "nblocks")?,
        detect_threshold = ops_value(params, "detect_threshold")?,
        car = ops_value(params, "car")?,
        nfilt_factor = ops_value(params, "nfilt_factor")?,
        ntbuff = ops_value(params, "ntbuff")?,
        nt = ops_value(params, "NT")?,
        n_pcs = ops_value(params, "nPCs")?,
    ))
}

/// Generated `<name>_master.m`: runs the version-specific pipeline and ends
/// by exporting `firings.json`, the only result format parsed back.
pub fn master_script(
    name: &str,
    install_path: &Path,
    output_dir: &Path,
    pipeline: &str,
) -> String {
    format!(
        "try\n\
         \x20   set(groot, 'defaultFigureVisible', 'off');\n\
         \x20   restoredefaultpath;\n\
         \x20   addpath(genpath('{install}'));\n\
         \x20   fpath = '{fpath}';\n\
         \n\
         \x20   run(fullfile(fpath, '{name}_channelmap.m'));\n\
         \x20   run(fullfile(fpath, '{name}_config.m'));\n\
         \n\
         {pipeline}\
         \n\
         \x20   spike_times = rez.st3(:, 1);\n\
         \x20   spike_clusters = rez.st3(:, 2);\n\
         \x20   cluster_ids = unique(spike_clusters);\n\
         \x20   for k = 1:numel(cluster_ids)\n\
         \x20       cid = cluster_ids(k);\n\
         \x20       out.units(k).unit_id = cid - 1;\n\
         \x20       out.units(k).spike_train = spike_times(spike_clusters == cid) - 1;\n\
         \x20       if rez.good(cid)\n\
         \x20           out.units(k).label = 'good';\n\
         \x20       else\n\
         \x20           out.units(k).label = 'mua';\n\
         \x20       end\n\
         \x20   end\n\
         \x20   out.sampling_frequency = ops.fs;\n\
         \x20   fid = fopen(fullfile(fpath, 'firings.json'), 'w');\n\
         \x20   fwrite(fid, jsonencode(out));\n\
         \x20   fclose(fid);\n\
         catch ME\n\
         \x20   disp(getReport(ME));\n\
         \x20   quit(1);\n\
         end\n\
         quit(0);\n",
        install = install_path.display(),
        fpath = output_dir.display(),
        name = name,
        pipeline = pipeline,
    )
}

/// The launch script handed to the shell runner: `cd` into the working
/// directory and run the generated master under headless MATLAB.
pub fn launch_script(name: &str, output_dir: &Path) -> String {
    format!(
        "cd \"{dir}\"\n\
         matlab -nosplash -nodisplay -log -r {name}_master\n",
        dir = output_dir.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spikerun_shared_types::Recording;
    use spikerun_sorter_abstraction::ParamSchema;
    use std::sync::Arc;

    #[test]
    fn install_detection_needs_an_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let config = KilosortConfig::new(dir.path());
        assert!(!config.is_installed(&["main_kilosort.m"]));

        std::fs::write(dir.path().join("main_kilosort.m"), "").unwrap();
        assert!(config.is_installed(&["master_kilosort.m", "main_kilosort.m"]));
        assert!(!KilosortConfig::default().is_installed(&["main_kilosort.m"]));
    }

    #[test]
    fn version_of_a_plain_directory_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(KilosortConfig::new(dir.path()).version(), "unknown");
    }

    #[test]
    fn batch_size_defaults_and_clamps() {
        let schema = ParamSchema::new()
            .with("NT", Value::Null, "Batch size")
            .with("ntbuff", 64, "Buffer samples");

        let mut params = schema.defaults();
        normalize_batch_size(&mut params);
        assert_eq!(params.get_u64("NT"), Some(64 * 1024 + 64));

        params.set("NT", 1000);
        normalize_batch_size(&mut params);
        assert_eq!(params.get_u64("NT"), Some(992));
    }

    #[test]
    fn matlab_rendering_covers_the_schema_value_kinds() {
        assert_eq!(matlab_value(&json!(true)), "1");
        assert_eq!(matlab_value(&json!(0.1)), "0.1");
        assert_eq!(matlab_value(&json!([10, 4])), "[10, 4]");
        assert_eq!(matlab_value(&Value::Null), "[]");
    }

    #[test]
    fn channel_map_script_requires_locations() {
        let bare = RecordingView::full(Arc::new(Recording::in_memory(
            vec![vec![0i16; 4]; 2],
            30_000.0,
        )));
        assert!(channel_map_script(&bare).is_err());

        let located = RecordingView::full(Arc::new(
            Recording::in_memory(vec![vec![0i16; 4]; 2], 30_000.0)
                .with_locations(&[[0.0, 0.0], [0.0, 20.0]]),
        ));
        let script = channel_map_script(&located).unwrap();
        assert!(script.contains("Nchannels = 2;"));
        assert!(script.contains("ycoords = [0, 20];"));
    }
}
