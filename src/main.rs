use crate::config::{Config, app_name, version};
use crate::decoder::HeaderEngine;
use crate::pipeline::{Format, InputChunk, Mpeg2Dec, PipelineState, StreamEvent};
use crate::report::FrameReport;
use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::{Arg, ArgAction, Command, value_parser};
use log::{error, info};
use std::fs::File;
use std::io::{self, Read};
use std::process;

pub mod config;
pub mod decoder;
pub mod pipeline;
pub mod report;
pub mod vo;

pub fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .help("MPEG-1/2 video elementary stream to decode.")
                .required(true),
        )
        .arg(
            Arg::new("chunk-size")
                .short('c')
                .long("chunk-size")
                .value_name("BYTES")
                .help("Bytes handed to the decoder per chunk.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("pts-trace")
                .short('t')
                .long("pts-trace")
                .value_name("JSON")
                .help("JSON array of {chunk, pts_ms} timestamps to attach to chunks."),
        )
        .arg(
            Arg::new("discontinuity")
                .short('d')
                .long("discontinuity")
                .value_name("CHUNK")
                .help("Signal a discontinuity after this chunk (repeatable).")
                .action(ArgAction::Append)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("peer-pool")
                .short('p')
                .long("peer-pool")
                .help("Allocate frames from a pool owned by the output.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .help("Print one JSON record per frame on stdout.")
                .action(ArgAction::SetTrue),
        )
}

fn run(config: &Config) -> Result<()> {
    let mut input = File::open(&config.input)
        .with_context(|| format!("opening {}", config.input.display()))?;

    let mut report = FrameReport::new(io::stdout().lock(), config.json);
    if config.peer_pool {
        report = report.with_pool();
    }

    let mut dec = Mpeg2Dec::new(HeaderEngine::new(), report);
    let mut events = dec.subscribe();
    dec.set_state(PipelineState::Playing)?;

    let mut index = 0;
    let mut buf = BytesMut::zeroed(config.chunk_size);
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let data = buf.split_to(n).freeze();
        buf.resize(config.chunk_size, 0);
        dec.chain(InputChunk::new(data, config.trace.pts_for(index)))?;

        if config.discontinuity_after(index) {
            dec.handle_event(StreamEvent::Discontinuity)?;
        }
        while let Ok(event) = events.try_recv() {
            info!("{}", event);
        }
        index += 1;
    }

    dec.handle_event(StreamEvent::Eos)?;
    while let Ok(event) = events.try_recv() {
        info!("{}", event);
    }

    if let Some((_, frames)) = dec.query_position(Format::Units) {
        info!(
            "stream ends at frame {} ({}), {:.3} fps",
            frames,
            dec.clock().next_time(),
            dec.frame_rate()
        );
    }
    info!("{}", dec.health());
    let report = dec.into_sink()?;
    info!("{} frames from {} chunks", report.frames(), index);
    if let Some(pool) = report.pool() {
        info!("{:?}", pool);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let config = match Config::from_matches(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            process::exit(2);
        }
    };

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        process::exit(1);
    }
}
