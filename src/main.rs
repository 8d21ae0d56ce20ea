/*
 *  main.rs
 *
 *  NoisLED - sound level monitor
 *  (c) 2024-26 Jay Liao
 *
 *  Wires the pipeline together: calibrate the ADC, start the sampler, the
 *  level mapper and the aggregation server, then wait for a termination
 *  signal and wind everything down.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

#[cfg(not(feature = "hardware"))]
compile_error!("the noisled binary requires the 'hardware' feature (enabled by default)");

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use sqlx::mysql::MySqlConnectOptions;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use noisled::alert::AlertChannel;
use noisled::config;
use noisled::hw::{Ads1115, SpiLed};
use noisled::level::LevelMapper;
use noisled::sampler::Sampler;
use noisled::server::{AggregationServer, ServerConfig};
use noisled::state::SharedLevels;
use noisled::store::MySqlStore;
use noisled::ws2812::{LedFrame, LedTransport, Rgb, TransmitError, Ws2812Encoder, LED_COUNT};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Waits for SIGINT, SIGTERM, or SIGHUP.
async fn signal_handler() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

fn test_pattern(brightness: u8) -> LedFrame {
    let palette = [
        Rgb { r: brightness, g: 0, b: 0 },
        Rgb { r: 0, g: brightness, b: 0 },
        Rgb { r: 0, g: 0, b: brightness },
        Rgb { r: brightness, g: brightness, b: brightness },
    ];
    let mut frame = LedFrame::dark();
    for i in 0..LED_COUNT {
        frame.set(i, palette[i % palette.len()]);
    }
    frame
}

/// Four-pattern strip self-test at startup: dim RGBW, dark, full RGBW,
/// dark. Doubles as a visual check that the wiring and symbol timing work.
async fn splash<T: LedTransport>(encoder: &mut Ws2812Encoder<T>) -> Result<(), TransmitError> {
    for frame in [
        test_pattern(0x20),
        LedFrame::dark(),
        test_pattern(0xFF),
        LedFrame::dark(),
    ] {
        encoder.encode_and_send(&frame)?;
        tokio::time::sleep(Duration::from_millis(125)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load().context("configuration error")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_secs()
        .init();

    info!("{} listens so you don't have to", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    // Database first: a misconfigured store is fatal before any hardware
    // gets touched.
    let mut db_opts = MySqlConnectOptions::new()
        .host(&cfg.db_host())
        .port(cfg.db_port())
        .username(&cfg.db_user())
        .database(&cfg.db_name());
    if let Some(password) = cfg.db_password() {
        db_opts = db_opts.password(&password);
    }
    let store = Arc::new(
        MySqlStore::connect(db_opts)
            .await
            .context("initial database connection failed")?,
    );

    let adc = Ads1115::open(cfg.i2c_bus(), cfg.sensor_address())
        .context("failed to open the sound ADC")?;
    let led = SpiLed::open(cfg.spi_bus(), cfg.spi_clock_hz())
        .context("failed to open the LED strip")?;
    let mut encoder = Ws2812Encoder::new(led);

    if cfg.no_splash() {
        info!("skipping LED self-test");
    } else {
        splash(&mut encoder).await.context("LED self-test failed")?;
    }

    let levels = Arc::new(SharedLevels::new());
    let alert = Arc::new(AlertChannel::new());

    let mut sampler = Sampler::new(adc, levels.clone());
    let cal = sampler.calibrate().await.context("calibration failed")?;

    let mapper = LevelMapper::new(levels.clone(), alert.clone(), encoder, cal);
    let server = AggregationServer::new(
        ServerConfig {
            port: cfg.port(),
            device_id: cfg.device_id(),
            window: cfg.window(),
            debounce: cfg.debounce(),
        },
        levels,
        alert,
        store,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let sampler_task = tokio::spawn(sampler.run(stop_rx.clone()));
    let mapper_task = tokio::spawn(mapper.run(stop_rx.clone()));
    let mut server_task = tokio::spawn(server.run(stop_rx));

    tokio::select! {
        _ = signal_handler() => {
            let _ = stop_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await {
                Ok(Ok(Ok(()))) => info!("aggregation server stopped"),
                Ok(Ok(Err(e))) => error!("aggregation server failed: {e}"),
                Ok(Err(e)) => error!("aggregation server panicked: {e}"),
                Err(_) => error!("aggregation server did not stop in time"),
            }
        }
        res = &mut server_task => {
            match res {
                Ok(Ok(())) => info!("aggregation server exited"),
                Ok(Err(e)) => error!("aggregation server failed: {e}"),
                Err(e) => error!("aggregation server panicked: {e}"),
            }
            let _ = stop_tx.send(true);
        }
    }

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = sampler_task.await;
        let _ = mapper_task.await;
    })
    .await;

    info!("shutdown complete");
    Ok(())
}
