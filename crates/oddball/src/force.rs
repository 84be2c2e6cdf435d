//! Force-sensor streaming to a UDP endpoint.
//!
//! Separate from the trial engine: continuous signal forwarding, not trial
//! scheduling. A polled sensor capability with an explicit start/stop
//! lifecycle feeds voltage ratios; each fresh sample is converted to force
//! ((ratio - offset) * gain * g) and sent as an ASCII float datagram. The
//! loop runs until the stop flag is raised and always releases the sensor
//! on the way out.

use std::io::BufRead;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use oddconf::ForceConfig;

#[derive(Debug, Error)]
pub enum ForceError {
    #[error("force sensor failed: {0}")]
    Sensor(String),

    #[error("failed to send force datagram to {target}: {source}")]
    Send {
        target: String,
        source: std::io::Error,
    },

    #[error("failed to open UDP socket: {0}")]
    Socket(std::io::Error),
}

/// Polled force-sensor capability.
///
/// `read` is non-blocking and returns the freshest voltage ratio, or
/// `None` when no new sample has arrived since the last read.
pub trait ForceSensor {
    fn start(&mut self) -> Result<(), ForceError>;
    fn read(&mut self) -> Result<Option<f64>, ForceError>;
    fn stop(&mut self);

    /// False once the source can never produce another sample; the
    /// forwarder treats exhaustion as a stop signal.
    fn is_active(&self) -> bool {
        true
    }
}

/// Streams converted force readings to a UDP peer.
pub struct ForceForwarder {
    config: ForceConfig,
    socket: UdpSocket,
    target: String,
}

impl ForceForwarder {
    pub fn new(config: &ForceConfig, ip: &str, port: u16) -> Result<Self, ForceError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(ForceError::Socket)?;
        Ok(Self {
            config: config.clone(),
            socket,
            target: format!("{ip}:{port}"),
        })
    }

    /// Convert a raw voltage ratio to force in newtons.
    pub fn force_from_ratio(&self, ratio: f64) -> f64 {
        (ratio - self.config.offset) * self.config.gain * self.config.gravity
    }

    /// Forward samples until `running` goes false. Returns the number of
    /// datagrams sent. The sensor is stopped on every exit path.
    pub fn run(
        &mut self,
        sensor: &mut dyn ForceSensor,
        running: &AtomicBool,
    ) -> Result<u64, ForceError> {
        sensor.start()?;
        info!(target = %self.target, "force forwarding started");
        let result = self.forward(sensor, running);
        sensor.stop();
        info!("force forwarding stopped");
        result
    }

    fn forward(
        &mut self,
        sensor: &mut dyn ForceSensor,
        running: &AtomicBool,
    ) -> Result<u64, ForceError> {
        let interval = Duration::from_millis(self.config.data_interval_ms);
        let mut sent: u64 = 0;
        while running.load(Ordering::SeqCst) && sensor.is_active() {
            if let Some(ratio) = sensor.read()? {
                let force = self.force_from_ratio(ratio);
                let payload = force.to_string();
                self.socket
                    .send_to(payload.as_bytes(), &self.target)
                    .map_err(|source| ForceError::Send {
                        target: self.target.clone(),
                        source,
                    })?;
                sent += 1;
                debug!(force, "sample forwarded");
            }
            std::thread::sleep(interval);
        }
        Ok(sent)
    }
}

/// Sensor adapter reading ASCII voltage ratios, one per line, from a file
/// or FIFO (typically a hardware daemon's output pipe).
///
/// A reader thread drains the source; `read` returns the freshest queued
/// sample without blocking.
pub struct LineSensor {
    path: PathBuf,
    rx: Option<mpsc::Receiver<f64>>,
    stop: Arc<AtomicBool>,
    exhausted: bool,
}

impl LineSensor {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            exhausted: false,
        }
    }
}

impl ForceSensor for LineSensor {
    fn start(&mut self) -> Result<(), ForceError> {
        let file = std::fs::File::open(&self.path)
            .map_err(|e| ForceError::Sensor(format!("cannot open {}: {e}", self.path.display())))?;
        let (tx, rx) = mpsc::channel();
        let stop = Arc::clone(&self.stop);
        std::thread::spawn(move || {
            for line in std::io::BufReader::new(file).lines() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(line) = line else { break };
                match line.trim().parse::<f64>() {
                    Ok(ratio) => {
                        if tx.send(ratio).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!(line, "unparseable sensor sample, skipped"),
                }
            }
        });
        self.rx = Some(rx);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<f64>, ForceError> {
        let Some(rx) = &self.rx else { return Ok(None) };
        // drain to the freshest sample
        let mut latest = None;
        loop {
            match rx.try_recv() {
                Ok(ratio) => latest = Some(ratio),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(latest)
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.rx = None;
    }

    fn is_active(&self) -> bool {
        !self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct ScriptedSensor {
        samples: Vec<f64>,
        started: bool,
        stopped: Arc<AtomicBool>,
    }

    impl ForceSensor for ScriptedSensor {
        fn start(&mut self) -> Result<(), ForceError> {
            self.started = true;
            Ok(())
        }

        fn read(&mut self) -> Result<Option<f64>, ForceError> {
            if self.samples.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.samples.remove(0)))
            }
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn conversion_matches_calibration() {
        let config = ForceConfig::default();
        let forwarder = ForceForwarder::new(&config, "127.0.0.1", 1).unwrap();
        // zero-load ratio maps to zero force
        assert!(forwarder.force_from_ratio(config.offset).abs() < 1e-12);
        let force = forwarder.force_from_ratio(config.offset + 0.01);
        assert!((force - 0.01 * config.gain * config.gravity).abs() < 1e-9);
    }

    #[test]
    fn forwards_samples_until_stopped() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut config = ForceConfig::default();
        config.data_interval_ms = 1;
        let stopped = Arc::new(AtomicBool::new(false));
        let mut sensor = ScriptedSensor {
            samples: vec![config.offset + 0.01, config.offset + 0.02],
            started: false,
            stopped: Arc::clone(&stopped),
        };
        let mut forwarder = ForceForwarder::new(&config, "127.0.0.1", port).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            running_clone.store(false, Ordering::SeqCst);
        });

        let sent = forwarder.run(&mut sensor, &running).unwrap();
        assert_eq!(sent, 2);
        assert!(sensor.started);
        assert!(stopped.load(Ordering::SeqCst));

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        let first: f64 = std::str::from_utf8(&buf[..len]).unwrap().parse().unwrap();
        let expected = forwarder.force_from_ratio(config.offset + 0.01);
        assert!((first - expected).abs() < 1e-9);
    }

    #[test]
    fn line_sensor_reads_freshest_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples");
        std::fs::write(&path, "0.01\nnot-a-number\n0.02\n").unwrap();

        let mut sensor = LineSensor::new(&path);
        sensor.start().unwrap();
        // give the reader thread time to drain the file
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sensor.read().unwrap(), Some(0.02));
        assert_eq!(sensor.read().unwrap(), None);
        sensor.stop();
        assert_eq!(sensor.read().unwrap(), None);
    }

    #[test]
    fn line_sensor_missing_file_errors() {
        let mut sensor = LineSensor::new(Path::new("/nonexistent/samples"));
        assert!(matches!(sensor.start(), Err(ForceError::Sensor(_))));
    }
}
