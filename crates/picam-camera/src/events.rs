//! Camera control-port events.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use picam_mmal::{ControlEvent, Status};
use tracing::{debug, error, info};

fn log_event(event: &ControlEvent) {
    match event {
        ControlEvent::SettingsChanged(settings) => {
            info!(
                exposure = settings.exposure,
                analog_gain = settings.analog_gain.as_f64(),
                digital_gain = settings.digital_gain.as_f64(),
                awb_red = settings.awb_red_gain.as_f64(),
                awb_blue = settings.awb_blue_gain.as_f64(),
                focus = settings.focus_position,
                "Camera settings changed"
            );
        }
        ControlEvent::Error(Status::Again) => {
            error!("No data received from sensor. Check all connections, including the sensor ribbon cable");
        }
        ControlEvent::Error(status) => {
            error!(%status, "Camera control error");
        }
    }
}

/// Log camera control events until the control port is disabled.
pub fn spawn_control_logger(events: Receiver<ControlEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in events.iter() {
            log_event(&event);
        }
        debug!("Camera control logger stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::CameraSettings;

    #[test]
    fn test_logger_stops_when_sender_dropped() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let handle = spawn_control_logger(rx);
        tx.send(ControlEvent::SettingsChanged(CameraSettings::default()))
            .unwrap();
        tx.send(ControlEvent::Error(Status::Again)).unwrap();
        drop(tx);
        handle.join().unwrap();
    }
}
