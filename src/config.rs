use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::types::{MSECOND, Timestamp};

/// Bytes read from the input per chunk unless overridden
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// One upstream timestamp: the chunk it is attached to and its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracePoint {
    pub chunk: usize,
    pub pts_ms: i64,
}

/// Timestamps to attach to input chunks, as upstream would.
///
/// Loaded from a JSON array of [`TracePoint`]. Chunks not listed carry no
/// timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PtsTrace {
    points: Vec<TracePoint>,
}

impl PtsTrace {
    /// Only the first chunk is stamped, at zero
    pub fn start_at_zero() -> Self {
        Self {
            points: vec![TracePoint { chunk: 0, pts_ms: 0 }],
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut trace: PtsTrace = serde_json::from_str(json).context("invalid pts trace")?;
        if let Some(p) = trace.points.iter().find(|p| p.pts_ms.checked_mul(MSECOND).is_none()) {
            bail!("pts {}ms of chunk {} is out of range", p.pts_ms, p.chunk);
        }
        trace.points.sort_by_key(|p| p.chunk);
        Ok(trace)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading pts trace {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn pts_for(&self, chunk: usize) -> Option<Timestamp> {
        self.points
            .binary_search_by_key(&chunk, |p| p.chunk)
            .ok()
            .map(|i| Timestamp::from_millis(self.points[i].pts_ms))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Run configuration assembled from the command line
#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub chunk_size: usize,
    pub trace: PtsTrace,
    /// Chunk indices followed by a discontinuity event
    pub discontinuities: Vec<usize>,
    /// Allocate frames from a recycling pool owned by the output
    pub peer_pool: bool,
    /// Print one JSON record per frame on stdout
    pub json: bool,
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let Some(input) = matches.get_one::<String>("input") else {
            bail!("no input file given");
        };

        let chunk_size = matches
            .get_one::<usize>("chunk-size")
            .copied()
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            bail!("chunk size must be positive");
        }

        let trace = match matches.get_one::<String>("pts-trace") {
            Some(path) => PtsTrace::load(Path::new(path))?,
            None => PtsTrace::start_at_zero(),
        };

        let mut discontinuities: Vec<usize> = matches
            .get_many::<usize>("discontinuity")
            .map(|values| values.copied().collect())
            .unwrap_or_default();
        discontinuities.sort_unstable();

        Ok(Config {
            input: PathBuf::from(input),
            chunk_size,
            trace,
            discontinuities,
            peer_pool: matches.get_flag("peer-pool"),
            json: matches.get_flag("json"),
        })
    }

    pub fn discontinuity_after(&self, chunk: usize) -> bool {
        self.discontinuities.binary_search(&chunk).is_ok()
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_lookup() {
        let trace = PtsTrace::from_json(
            r#"[{"chunk": 4, "pts_ms": 160}, {"chunk": 0, "pts_ms": 0}, {"chunk": 2, "pts_ms": 80}]"#,
        )
        .unwrap();

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.pts_for(0), Some(Timestamp::ZERO));
        assert_eq!(trace.pts_for(2), Some(Timestamp::from_millis(80)));
        assert_eq!(trace.pts_for(4), Some(Timestamp::from_millis(160)));
        assert_eq!(trace.pts_for(1), None);
    }

    #[test]
    fn test_trace_rejects_garbage() {
        assert!(PtsTrace::from_json(r#"{"chunk": 1}"#).is_err());
        assert!(PtsTrace::from_json("[").is_err());
    }

    #[test]
    fn test_trace_rejects_out_of_range_pts() {
        let err = PtsTrace::from_json(r#"[{"chunk": 3, "pts_ms": 10000000000000}]"#).unwrap_err();
        assert!(err.to_string().contains("chunk 3"));

        let trace = PtsTrace::from_json(r#"[{"chunk": 0, "pts_ms": 9000000000000}]"#).unwrap();
        assert_eq!(trace.pts_for(0), Some(Timestamp::from_nanos(9_000_000_000_000 * MSECOND)));
    }

    #[test]
    fn test_default_trace() {
        let trace = PtsTrace::start_at_zero();
        assert_eq!(trace.pts_for(0), Some(Timestamp::ZERO));
        assert_eq!(trace.pts_for(1), None);
        assert!(!trace.is_empty());
    }

    #[test]
    fn test_config_from_command_line() {
        let matches = crate::cli()
            .try_get_matches_from(["mpeg2dec", "clip.m2v", "-c", "512", "-d", "7", "-d", "3", "--json"])
            .unwrap();
        let config = Config::from_matches(&matches).unwrap();

        assert_eq!(config.input, PathBuf::from("clip.m2v"));
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.discontinuities, vec![3, 7]);
        assert!(config.discontinuity_after(7));
        assert!(!config.discontinuity_after(4));
        assert!(config.json);
        assert!(!config.peer_pool);
        assert_eq!(config.trace, PtsTrace::start_at_zero());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let matches = crate::cli()
            .try_get_matches_from(["mpeg2dec", "clip.m2v", "--chunk-size", "0"])
            .unwrap();
        assert!(Config::from_matches(&matches).is_err());
    }

    #[test]
    fn test_trace_serializes_as_array() {
        let json = serde_json::to_string(&PtsTrace::start_at_zero()).unwrap();
        assert_eq!(json, r#"[{"chunk":0,"pts_ms":0}]"#);
    }
}
