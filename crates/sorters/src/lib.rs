//! Concrete sorter adapters
//!
//! Implementations of the adapter contract for the supported external
//! tools: Kilosort 2.5 and 3 (MATLAB) and Yass (Python CLI). Every adapter
//! stages its tool's inputs during prepare, runs the tool through the shell
//! runner, and parses the `firings.json` export back into a sorting result.

pub mod firings;
pub mod kilosort;
pub mod kilosort2_5;
pub mod kilosort3;
pub mod yass;

pub use firings::FIRINGS_FILE;
pub use kilosort::KilosortConfig;
pub use kilosort2_5::Kilosort25Sorter;
pub use kilosort3::Kilosort3Sorter;
pub use yass::YassSorter;
