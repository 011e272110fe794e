//! Process-backed quality judge.
//!
//! Runs the configured shell command once per candidate, writes a prompt to
//! its stdin and parses verdict JSON from its stdout. The pipeline owns the
//! timeout; the child is killed when the future is dropped.

use std::process::Stdio;

use async_trait::async_trait;
use dualmem_sdk::memory::parse_verdicts;
use dualmem_sdk::{Candidate, QualityJudge, SDKError, SDKResult, Verdict};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Judge backed by an external command.
#[derive(Debug, Clone, Default)]
pub struct CommandJudge {
    command: Option<String>,
}

impl CommandJudge {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }
}

#[async_trait]
impl QualityJudge for CommandJudge {
    async fn judge(&self, candidate: &Candidate) -> SDKResult<Vec<Verdict>> {
        let Some(command) = &self.command else {
            return Err(SDKError::judge_unavailable("no judge command configured"));
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("DUALMEM_CANDIDATE_KIND", candidate.kind.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SDKError::judge_unavailable(format!("failed to spawn judge: {e}")))?;

        // Feed stdin from its own task so a chatty judge can't stall on a full stdout pipe
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = judge_prompt(candidate);
            tokio::spawn(async move {
                let result = stdin.write_all(prompt.as_bytes()).await;
                drop(stdin);
                result
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SDKError::judge_unavailable(format!("failed to run judge: {e}")))?;

        if let Some(writer) = writer {
            match writer.await {
                // A judge that ignores its input may close stdin early
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(SDKError::judge_unavailable(format!("failed to write judge prompt: {e}")));
                }
                Err(e) => {
                    return Err(SDKError::judge_unavailable(format!("judge prompt writer failed: {e}")));
                }
                _ => {}
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SDKError::judge_unavailable(format!(
                "judge exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let verdicts = parse_verdicts(&stdout);
        tracing::debug!(
            kind = candidate.kind.as_str(),
            verdicts = verdicts.len(),
            "Judge responded"
        );
        Ok(verdicts)
    }
}

/// Prompt sent to the judge for one candidate.
pub fn judge_prompt(candidate: &Candidate) -> String {
    format!(
        "Decide whether the following {kind} is worth keeping as long-term knowledge.\n\
         Reply with JSON only: an object or an array of objects with the fields\n\
         title, content, category, subcategory, tags (array of strings),\n\
         quality_score (0.0 to 1.0) and include (true or false).\n\n\
         Context: {context}\n\n\
         ---\n{text}\n---\n",
        kind = candidate.kind.as_str().replace('_', " "),
        context = candidate.context,
        text = candidate.text,
    )
}
