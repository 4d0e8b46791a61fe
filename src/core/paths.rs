//! Workspace layout constants.
//!
//! The on-disk layout is a compatibility surface shared with the batch
//! cluster and the GPU node; names here must not change.
//!
//! ```text
//! workspace/
//! +-- .puzzle_workspace   # Signature (zero-length)
//! +-- config              # Runtime configuration
//! +-- template.condor     # Template cluster submission file
//! +-- train/              # Training data
//! |   +-- puzzle.cfg      # Puzzle descriptor
//! |   +-- KEY.npz         # Key configurations detected from the training puzzle
//! +-- test/               # Testing data, one directory per puzzle
//! |   +-- <puzzle>/puzzle.cfg
//! +-- condor_scratch/     # Cluster stdio and logs
//! +-- nn_scratch/         # Checkpoints and pid files
//! |   +-- rob.pid
//! |   +-- env.pid
//! +-- solver_scratch/     # Solver scratch state
//! ```

pub const SIGNATURE_FILE: &str = ".puzzle_workspace";
pub const CONFIG_FILE: &str = "config";
pub const CONDOR_TEMPLATE: &str = "template.condor";

/// Puzzle descriptor, present in `train/` and in every `test/<puzzle>/`.
pub const PUZZLE_CFG_FILE: &str = "puzzle.cfg";

pub const TRAINING_DIR: &str = "train";
pub const EXTRA_TRAINING_DIR: &str = "extra_train";
pub const TESTING_DIR: &str = "test";
pub const CONDOR_SCRATCH: &str = "condor_scratch";
pub const NEURAL_SCRATCH: &str = "nn_scratch";
pub const SOLVER_SCRATCH: &str = "solver_scratch";

/// Uppercase name marks ground truth; lowercase `key.npz` holds predictions.
pub const KEY_FILE: &str = "train/KEY.npz";

/// Timekeeper spans appended by long-running stages.
pub const PERFORMANCE_LOG: &str = "performance.log";

/// Well-known advisory lock path guarding the GPU device.
/// Shared by every process on the host, workspace-independent.
pub const GPU_LOCK_FILE: &str = "/tmp/gridhand.gpulock";

/// Scratch subdirectories created by `init`.
pub const SCRATCH_DIRS: &[&str] = &[CONDOR_SCRATCH, NEURAL_SCRATCH, SOLVER_SCRATCH];
