//! Window screenshots through an external capture program (grim).

use crate::config::CaptureConfig;
use crate::error::CommandError;
use crate::services::hyprland::Geometry;
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct CaptureService {
    program: String,
    scale: f64,
    timeout: Duration,
}

impl CaptureService {
    pub fn new(config: &CaptureConfig, timeout: Duration) -> Self {
        Self {
            program: config.program.clone(),
            scale: config.scale,
            timeout,
        }
    }

    /// Capture `geometry` and return the PNG bytes.
    pub async fn capture(&self, geometry: Geometry) -> Result<Vec<u8>, CommandError> {
        let args = capture_args(geometry, self.scale);
        debug!("Capturing {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| CommandError::Timeout("capture"))?
            .map_err(|e| CommandError::Failed(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CommandError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(CommandError::Failed(format!("{} produced no image", self.program)));
        }
        Ok(output.stdout)
    }
}

/// `grim -g "X,Y WxH" -s SCALE -`
fn capture_args(geometry: Geometry, scale: f64) -> Vec<String> {
    vec![
        "-g".to_string(),
        format!(
            "{},{} {}x{}",
            geometry.x, geometry.y, geometry.width, geometry.height
        ),
        "-s".to_string(),
        scale.to_string(),
        "-".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Geometry = Geometry {
        x: 10,
        y: 20,
        width: 640,
        height: 480,
    };

    fn service(program: &str, timeout: Duration) -> CaptureService {
        CaptureService::new(
            &CaptureConfig {
                enabled: true,
                program: program.to_string(),
                scale: 0.5,
            },
            timeout,
        )
    }

    #[test]
    fn geometry_is_passed_as_grim_region() {
        assert_eq!(
            capture_args(WINDOW, 0.5),
            vec!["-g", "10,20 640x480", "-s", "0.5", "-"]
        );
    }

    #[tokio::test]
    async fn stdout_is_returned() {
        // `echo` prints its arguments, which is enough to check the plumbing.
        let bytes = service("echo", Duration::from_secs(5))
            .capture(WINDOW)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "-g 10,20 640x480 -s 0.5 -\n");
    }

    #[tokio::test]
    async fn failures_and_missing_programs_are_errors() {
        assert!(matches!(
            service("false", Duration::from_secs(5)).capture(WINDOW).await,
            Err(CommandError::Failed(_))
        ));
        assert!(matches!(
            service("/nonexistent/grim", Duration::from_secs(5))
                .capture(WINDOW)
                .await,
            Err(CommandError::Failed(_))
        ));
    }
}
