//! Task partitioning and canonical artifact naming.
//!
//! Work is sharded across many independent processes by integer task id
//! alone: any worker can reconstruct its slice of the (batch, vertex)
//! matrix and the exact file paths it owns without coordination. Path
//! strings are a compatibility surface; the grammar must stay stable so
//! that re-runs find artifacts produced by earlier (possibly partial)
//! runs and skip them.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::log_status;
use crate::utils::io;

/// Column holding touch configuration vectors in a touch-query batch file.
pub const TOUCH_VERTEX_FIELD: &str = "TOUCH_V";
/// Column flagging samples that escaped to infinity.
pub const IS_INF_FIELD: &str = "IS_INF";

pub fn touchq_file(dir: &Path, vert_id: i64, batch_id: i64) -> PathBuf {
    dir.join(format!("touchq-{}-{}.npz", vert_id, batch_id))
}

pub fn isectgeo_file(dir: &Path, vert_id: i64, conf_id: i64) -> PathBuf {
    dir.join(format!("isectgeo-from-vert-{}-{}.obj", vert_id, conf_id))
}

pub fn uvgeo_file(dir: &Path, geo_type: &str, vert_id: i64, conf_id: i64) -> PathBuf {
    dir.join(format!("{}-uv-from-vert-{}-{}.obj", geo_type, vert_id, conf_id))
}

pub fn atlas_file(
    dir: &Path,
    geo_type: &str,
    vert_id: i64,
    index: Option<i64>,
    no_weight: bool,
) -> PathBuf {
    let nw_suffix = if no_weight { "-nw" } else { "" };
    match index {
        None => dir.join(format!(
            "atlas-{}-from-vert-{}{}.npz",
            geo_type, vert_id, nw_suffix
        )),
        Some(index) => dir.join(format!(
            "atlas-{}-from-vert-{}-{}{}.npz",
            geo_type, vert_id, index, nw_suffix
        )),
    }
}

pub fn atlas2prim_file(dir: &Path, geo_type: &str) -> PathBuf {
    dir.join(format!("atlas2prim-{}.npz", geo_type))
}

pub fn touchq_refined_file(dir: &Path, vert_id: i64, batch_id: i64) -> PathBuf {
    dir.join(format!("touchq_re-from-vert-{}-{}.npz", vert_id, batch_id))
}

pub fn touchq_refined_vis_file(dir: &Path, vert_id: i64, batch_id: i64) -> PathBuf {
    dir.join(format!("touchq_re_vis-from-vert-{}-{}.npz", vert_id, batch_id))
}

/// Maps flat task ids onto the (batch, vertex) matrix and resolves the
/// artifact paths owned by each task.
///
/// `gp_batch` is the granularity of geometry processing, `tq_batch` the
/// granularity of touch-query sampling. Geometry processing is the more
/// expensive side, so several geometry tasks subdivide one touch-query
/// batch; `tq_batch % gp_batch == 0` is enforced at construction. Both
/// sizes may be absent for stages that never partition.
#[derive(Debug, Clone)]
pub struct TaskPartitioner {
    io_dir: PathBuf,
    gp_batch: Option<i64>,
    tq_batch: Option<i64>,
    gp_per_tq: Option<i64>,
    tunnel_vertices: Vec<Vec<f64>>,
}

impl TaskPartitioner {
    pub fn new(
        io_dir: impl Into<PathBuf>,
        gp_batch: Option<i64>,
        tq_batch: Option<i64>,
        tunnel_vertices: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let gp_per_tq = match (gp_batch, tq_batch) {
            (Some(gp), Some(tq)) => {
                if gp <= 0 || tq <= 0 {
                    return Err(Error::config_invalid_value(
                        "batch_sizes",
                        Some(format!("gp={} tq={}", gp, tq)),
                        "batch sizes must be positive",
                    ));
                }
                if tq % gp != 0 {
                    return Err(Error::config_invalid_value(
                        "batch_sizes",
                        Some(format!("gp={} tq={}", gp, tq)),
                        "touch-query batch size must be a multiple of the geometry batch size",
                    ));
                }
                Some(tq / gp)
            }
            (Some(_), None) => {
                return Err(Error::config_invalid_value(
                    "batch_sizes",
                    None,
                    "geometry batch size given without a touch-query batch size",
                ));
            }
            _ => None,
        };

        Ok(Self {
            io_dir: io_dir.into(),
            gp_batch,
            tq_batch,
            gp_per_tq,
            tunnel_vertices,
        })
    }

    pub fn io_dir(&self) -> &Path {
        &self.io_dir
    }

    pub fn tq_batch_size(&self) -> Option<i64> {
        self.tq_batch
    }

    /// Resize the flat task vector into the (batch, vertex) matrix.
    pub fn decompose(&self, task_id: i64) -> Result<(i64, i64)> {
        if task_id < 0 {
            return Err(Error::partition_out_of_range(task_id));
        }
        let num_vertices = self.tunnel_vertices.len() as i64;
        if num_vertices == 0 {
            return Err(Error::validation_invalid_argument(
                "tunnel_vertices",
                "vertex set is empty",
            ));
        }
        Ok((task_id / num_vertices, task_id % num_vertices))
    }

    pub fn batch_of(&self, task_id: i64) -> Result<i64> {
        Ok(self.decompose(task_id)?.0)
    }

    pub fn vertex_of(&self, task_id: i64) -> Result<i64> {
        Ok(self.decompose(task_id)?.1)
    }

    pub fn tunnel_vertex(&self, task_id: i64) -> Result<&[f64]> {
        let vert_id = self.vertex_of(task_id)? as usize;
        self.tunnel_vertices
            .get(vert_id)
            .map(|v| v.as_slice())
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "tunnel_vertices",
                    format!("no vertex at index {}", vert_id),
                )
            })
    }

    /// Map a geometry-processing task onto its owning touch-query batch.
    /// Returns `(tq_task_id, remainder)` where the remainder selects which
    /// `gp_batch`-sized slice of the batch this task consumes.
    pub fn geometry_task_to_touch_batch(&self, gp_task_id: i64) -> Result<(i64, i64)> {
        if gp_task_id < 0 {
            return Err(Error::partition_out_of_range(gp_task_id));
        }
        let gp_per_tq = self.gp_per_tq.ok_or_else(|| {
            Error::config_missing_key("batch_sizes.gp_batch", None)
                .with_hint("This stage requires geometry and touch-query batch sizes")
        })?;
        Ok((gp_task_id / gp_per_tq, gp_task_id % gp_per_tq))
    }

    pub fn touchq_path(&self, task_id: i64) -> Result<PathBuf> {
        let (batch_id, vert_id) = self.decompose(task_id)?;
        Ok(touchq_file(&self.io_dir, vert_id, batch_id))
    }

    pub fn isectgeo_path(&self, vert_id: i64, conf_id: i64) -> PathBuf {
        isectgeo_file(&self.io_dir, vert_id, conf_id)
    }

    pub fn uvgeo_path(&self, geo_type: &str, vert_id: i64, conf_id: i64) -> PathBuf {
        uvgeo_file(&self.io_dir, geo_type, vert_id, conf_id)
    }

    pub fn atlas_path(&self, geo_type: &str, task_id: i64) -> Result<PathBuf> {
        let (_batch_id, vert_id) = self.decompose(task_id)?;
        Ok(atlas_file(&self.io_dir, geo_type, vert_id, None, false))
    }

    pub fn atlas2prim_path(&self, geo_type: &str) -> PathBuf {
        atlas2prim_file(&self.io_dir, geo_type)
    }

    pub fn touchq_refined_path(&self, task_id: i64) -> Result<PathBuf> {
        let (batch_id, vert_id) = self.decompose(task_id)?;
        Ok(touchq_refined_file(&self.io_dir, vert_id, batch_id))
    }

    pub fn touchq_refined_vis_path(&self, task_id: i64) -> Result<PathBuf> {
        let (batch_id, vert_id) = self.decompose(task_id)?;
        Ok(touchq_refined_vis_file(&self.io_dir, vert_id, batch_id))
    }

    /// Stream the touch-query records owned by one geometry-processing task.
    ///
    /// Loads the owning batch file once and yields `gp_batch` consecutive
    /// records, each carrying the requested columns, the originating vertex
    /// id, and a globally unique configuration id. The batch file must
    /// pre-exist; absence is an error, not end of data. Each call re-reads
    /// the file, so concurrent streams over the same inputs are independent.
    pub fn stream_touch_queries(
        &self,
        gp_task_id: i64,
        fields: &[&str],
    ) -> Result<TouchQueryStream> {
        let (tq_task_id, remainder) = self.geometry_task_to_touch_batch(gp_task_id)?;
        // new() guarantees both sizes once gp_per_tq is set
        let gp_batch = self.gp_batch.unwrap_or_default();
        let tq_batch = self.tq_batch.unwrap_or_default();

        let path = self.touchq_path(tq_task_id)?;
        let columns = load_batch_columns(&path, fields)?;

        Ok(TouchQueryStream {
            columns,
            cursor: 0,
            start: remainder * gp_batch,
            size: gp_batch,
            vertex_id: self.vertex_of(tq_task_id)?,
            conf_id_base: self.batch_of(tq_task_id)? * tq_batch,
        })
    }
}

fn load_batch_columns(path: &Path, fields: &[&str]) -> Result<Vec<Vec<Value>>> {
    if !path.is_file() {
        return Err(Error::artifact_missing(path.display().to_string()));
    }
    let content = io::read_file(path, "touch-query batch load")?;
    let map: serde_json::Map<String, Value> = serde_json::from_str(&content)
        .map_err(|e| Error::artifact_invalid(path.display().to_string(), e.to_string()))?;

    fields
        .iter()
        .map(|field| {
            map.get(*field)
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| {
                    Error::artifact_invalid(
                        path.display().to_string(),
                        format!("missing column {}", field),
                    )
                })
        })
        .collect()
}

/// One record pumped out of a touch-query batch.
#[derive(Debug, Clone)]
pub struct TouchRecord {
    pub values: Vec<Value>,
    pub vertex_id: i64,
    pub config_id: i64,
}

/// Finite, non-restartable stream over one geometry task's slice of a
/// touch-query batch.
#[derive(Debug)]
pub struct TouchQueryStream {
    columns: Vec<Vec<Value>>,
    cursor: i64,
    start: i64,
    size: i64,
    vertex_id: i64,
    conf_id_base: i64,
}

impl Iterator for TouchQueryStream {
    type Item = TouchRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.size {
            return None;
        }
        let index = (self.start + self.cursor) as usize;
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            values.push(column.get(index)?.clone());
        }
        let record = TouchRecord {
            values,
            vertex_id: self.vertex_id,
            config_id: self.conf_id_base + self.start + self.cursor,
        };
        self.cursor += 1;
        Some(record)
    }
}

/// Lazy sequence over intersecting-geometry artifacts for one vertex.
///
/// Configuration ids are written contiguously from 0, so the first missing
/// path is the natural end of the sequence.
pub fn intersection_geometry_sequence(dir: &Path, vert_id: i64) -> IntersectionGeometrySequence {
    IntersectionGeometrySequence {
        dir: dir.to_path_buf(),
        vert_id,
        conf_id: 0,
    }
}

#[derive(Debug)]
pub struct IntersectionGeometrySequence {
    dir: PathBuf,
    vert_id: i64,
    conf_id: i64,
}

impl Iterator for IntersectionGeometrySequence {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        let path = isectgeo_file(&self.dir, self.vert_id, self.conf_id);
        if !path.exists() {
            return None;
        }
        log_status!("partition", "loading {}", path.display());
        self.conf_id += 1;
        Some(path)
    }
}

/// Lazy sequence over UV-projection artifacts for one vertex.
///
/// UV artifacts may be produced out of order or skipped, so a missing path
/// yields a `None` gap marker and the index keeps advancing. The sequence
/// is unbounded; the caller supplies its own termination condition.
pub fn uv_geometry_sequence(dir: &Path, geo_type: &str, vert_id: i64) -> UvGeometrySequence {
    UvGeometrySequence {
        dir: dir.to_path_buf(),
        geo_type: geo_type.to_string(),
        vert_id,
        conf_id: 0,
    }
}

#[derive(Debug)]
pub struct UvGeometrySequence {
    dir: PathBuf,
    geo_type: String,
    vert_id: i64,
    conf_id: i64,
}

impl Iterator for UvGeometrySequence {
    type Item = Option<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = uvgeo_file(&self.dir, &self.geo_type, self.vert_id, self.conf_id);
        self.conf_id += 1;
        if !path.exists() {
            return Some(None);
        }
        Some(Some(path))
    }
}

/// Lazy sequence over every touch-query sample for one vertex, spanning
/// consecutive batch files. Batches are written in contiguous batch-id
/// order, so a missing batch file ends the stream.
pub fn touch_query_sequence(dir: &Path, vert_id: i64) -> TouchQuerySequence {
    TouchQuerySequence {
        dir: dir.to_path_buf(),
        vert_id,
        batch_id: 0,
        local_id: 0,
        current: None,
        failed: false,
    }
}

#[derive(Debug, Clone)]
pub struct TouchSample {
    pub touch_vertex: Value,
    pub is_infinite: Value,
}

#[derive(Debug)]
pub struct TouchQuerySequence {
    dir: PathBuf,
    vert_id: i64,
    batch_id: i64,
    local_id: usize,
    current: Option<(Vec<Value>, Vec<Value>)>,
    failed: bool,
}

impl Iterator for TouchQuerySequence {
    type Item = Result<TouchSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.current.is_none() {
            let path = touchq_file(&self.dir, self.vert_id, self.batch_id);
            if !path.is_file() {
                return None;
            }
            log_status!("partition", "loading {}", path.display());
            match load_batch_columns(&path, &[TOUCH_VERTEX_FIELD, IS_INF_FIELD]) {
                Ok(mut columns) => {
                    let is_inf = columns.pop()?;
                    let touch = columns.pop()?;
                    if touch.is_empty() {
                        return None;
                    }
                    self.local_id = 0;
                    self.current = Some((touch, is_inf));
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let (touch, is_inf) = self.current.as_ref()?;
        let sample = TouchSample {
            touch_vertex: touch.get(self.local_id)?.clone(),
            is_infinite: is_inf.get(self.local_id).cloned().unwrap_or(Value::Null),
        };
        self.local_id += 1;
        if self.local_id >= touch.len() {
            self.batch_id += 1;
            self.current = None;
        }
        Some(Ok(sample))
    }
}
