//! # syncropatch_nwb
//!
//! syncropatch_nwb converts the raw output of a Nanion Syncropatch 384 automated
//! patch-clamp instrument into per-cell HDF5 containers (rCells), following a structure
//! close to the Neurodata Without Borders layout. One experiment folder holds a set of
//! protocol folders, each with a json header and a set of binary trace files; every
//! recorded well of the chip ends up in its own container holding its metadata, the
//! traces and QC channels of every protocol, and the compounds applied to it.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### HDF5
//!
//! Before building and running syncropatch_nwb, HDF5 must be installed. Typically this
//! will be installed using a package manager (homebrew, apt, etc), and the Rust libraries
//! will auto detect the location of the HDF install. If HDF5 lives in a custom location,
//! write the following snippet into the file `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./syncropatch_nwb_cli` from the
//! top level repository.
//!
//! ## Configuration
//!
//! The YAML format of a configuration file is as follows:
//!
//! ```yml
//! raw_data_path: None
//! rcell_path: None
//! overwrite: false
//! validate: true
//! ```
//!
//! - raw_data_path: root of the instrument data. Experiments are looked up as
//! `<raw_data_path>/20<YY>/<experiment>` where YY are the first two digits of the
//! experiment name.
//! - rcell_path: containers are written under `<rcell_path>/rcell`.
//! - overwrite: replace containers which already exist. Otherwise an experiment whose
//! containers exist is skipped.
//! - validate: reload and check every container at the end of a run.
//!
//! ## Input
//!
//! ```text
//! 230512_001
//! |---- 230512_001.ini
//! |---- EBoardCheck_000(experiment header)
//! |---- QC_Data_001, FillChip_002, Auxiliary_Data_003(ignored)
//! |---- Activation_004
//! |    |---- <header>.json
//! |    |---- Tracedata_0.dat, Tracedata_1.dat, ...
//! ```
//!
//! The ini file describes the experiment, the cell lines of each chip column range and
//! the stimulus of each protocol (`<protocol> = <stim_type>,<stim_id>,<sweeps>`).
//!
//! ## Output
//!
//! Containers are written to
//! `<rcell_path>/rcell/<date>/<date>_<exp>/<date>_<exp>_<CLn>/<date>_<exp>_<CLn>_<well>.nwb`.
//!
//! ```text
//! / - version, status
//! |---- identifier, file_create_date, data_release, session_description(dset)
//! |---- general
//! |---- acquisition
//! |    |---- timeseries
//! |    |    |---- <stim>
//! |    |    |    |---- repetitions
//! |    |    |    |    |---- repetition#
//! |---- analysis
//! |    |---- pharmacology
//! |    |    |---- compList(dset)
//! |    |    |---- <stim>
//! |    |    |    |---- Group#
//! |---- stimulus
//! |    |---- presentation
//! |    |    |---- <stim>
//! ```
pub mod cell_record;
pub mod compound;
pub mod config;
pub mod constants;
pub mod error;
pub mod experiment;
pub mod process;
pub mod protocol;
pub mod protocol_data;
pub mod rcell_reader;
pub mod rcell_writer;
pub mod trace_file;
pub mod user_metadata;
pub mod well;
pub mod worker_status;
