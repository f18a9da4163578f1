//! XAdES-BES signing through an external program.
//!
//! The program reads the unsigned document on stdin and writes the signed
//! document on stdout. Certificate paths and passwords are passed through
//! its own arguments.

use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

use crate::{DocumentSigner, EngineError, ResultEngine};

#[derive(Clone, Debug)]
pub struct CommandSigner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSigner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl DocumentSigner for CommandSigner {
    async fn sign(&self, xml: &str) -> ResultEngine<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Signing(format!(
                    "cannot start signer {}: {e}",
                    self.program.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Signing("signer stdin unavailable".to_string()))?;
        let payload = xml.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                EngineError::Signing(format!("signer timed out after {:?}", self.timeout))
            })?
            .map_err(|e| EngineError::Signing(format!("signer failed: {e}")))?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "writing document to signer failed"),
            Err(e) => warn!(error = %e, "signer writer task failed"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Signing(format!(
                "signer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let signed = String::from_utf8(output.stdout)
            .map_err(|e| EngineError::Signing(format!("signer output is not UTF-8: {e}")))?;
        if signed.trim().is_empty() || !signed.contains("Signature") {
            return Err(EngineError::Signing(
                "signer produced no signed document".to_string(),
            ));
        }
        debug!(bytes = signed.len(), "document signed");
        Ok(signed)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> CommandSigner {
        CommandSigner::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[tokio::test]
    async fn signs_through_stdin_and_stdout() {
        let signer = shell(
            "sed 's#</factura>#<ds:Signature></ds:Signature></factura>#'",
            Duration::from_secs(5),
        );
        let signed = signer.sign("<factura></factura>").await.unwrap();
        assert_eq!(signed.trim(), "<factura><ds:Signature></ds:Signature></factura>");
    }

    #[tokio::test]
    async fn unsigned_output_is_an_error() {
        let signer = shell("cat", Duration::from_secs(5));
        assert!(matches!(
            signer.sign("<factura></factura>").await,
            Err(EngineError::Signing(_))
        ));
    }

    #[tokio::test]
    async fn failing_program_reports_stderr() {
        let signer = shell("echo 'bad certificate' >&2; exit 3", Duration::from_secs(5));
        let err = signer.sign("<factura></factura>").await.unwrap_err();
        assert!(matches!(err, EngineError::Signing(msg) if msg.contains("bad certificate")));
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let signer = shell("sleep 5", Duration::from_millis(100));
        assert!(matches!(
            signer.sign("<factura></factura>").await,
            Err(EngineError::Signing(msg)) if msg.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn missing_program_is_a_signing_error() {
        let signer = CommandSigner::new(
            "/nonexistent/signer",
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            signer.sign("<factura></factura>").await,
            Err(EngineError::Signing(_))
        ));
    }
}
