use super::{ApprovalStrategy, StrategyOutcome};
use std::io::{self, BufRead, Write};

const PREVIEW_LINES: usize = 60;
const APPROVE_WORDS: &[&str] = &["y", "yes", "approve", "approved", "accept"];
const REJECT_WORDS: &[&str] = &["n", "no", "reject", "rejected", "decline"];

/// Terminal prompt: shows a preview and loops until yes, no or end of input.
///
/// End of input counts as a rejection.
#[derive(Debug)]
pub struct InteractiveApproval<R, W> {
    input: R,
    output: W,
}

impl InteractiveApproval<io::StdinLock<'static>, io::Stdout> {
    /// Prompt on the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> InteractiveApproval<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Consume the strategy, returning the writer (for inspecting output).
    pub fn into_output(self) -> W {
        self.output
    }

    fn read_answer(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_preview(&mut self, plan_ref: &str, plan_text: &str) -> io::Result<()> {
        let rule = "=".repeat(72);
        writeln!(self.output, "\n{}", rule)?;
        writeln!(self.output, "  HUMAN APPROVAL REQUIRED")?;
        writeln!(self.output, "{}", rule)?;
        writeln!(self.output, "\nPlan document:\n  {}\n", plan_ref)?;

        let lines: Vec<&str> = plan_text.lines().collect();
        for line in lines.iter().take(PREVIEW_LINES) {
            writeln!(self.output, "{}", line)?;
        }
        if lines.len() > PREVIEW_LINES {
            writeln!(
                self.output,
                "\n... [{} more lines; type 'view' to print everything] ...",
                lines.len() - PREVIEW_LINES
            )?;
        }

        writeln!(self.output, "\n{}", rule)?;
        writeln!(self.output, "No code has been written yet. Conversion starts only after approval.")?;
        writeln!(self.output, "{}", rule)
    }
}

impl<R: BufRead, W: Write> ApprovalStrategy for InteractiveApproval<R, W> {
    fn name(&self) -> &'static str {
        "prompt"
    }

    fn decide(&mut self, plan_ref: &str, plan_text: &str) -> io::Result<StrategyOutcome> {
        self.print_preview(plan_ref, plan_text)?;

        loop {
            let Some(answer) =
                self.read_answer("\nApprove this conversion plan? [yes/no, or 'view' to reprint]: ")?
            else {
                writeln!(self.output, "\nInput closed; plan NOT approved.")?;
                return Ok(StrategyOutcome::Reject { feedback: None });
            };
            let answer = answer.to_lowercase();

            if answer == "view" {
                writeln!(self.output, "{}", plan_text)?;
                continue;
            }

            if APPROVE_WORDS.contains(&answer.as_str()) {
                writeln!(self.output, "\nPlan APPROVED.")?;
                return Ok(StrategyOutcome::Approve);
            }

            if REJECT_WORDS.contains(&answer.as_str()) {
                let feedback = self
                    .read_answer("Describe what needs to change (or press Enter to skip): ")?
                    .filter(|f| !f.is_empty());
                return Ok(StrategyOutcome::Reject { feedback });
            }

            writeln!(self.output, "  Unrecognised input '{}'. Please type 'yes' or 'no'.", answer)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(input: &str, plan_text: &str) -> (StrategyOutcome, String) {
        let mut strategy = InteractiveApproval::new(Cursor::new(input.to_string()), Vec::new());
        let outcome = strategy.decide("plans/orders.md", plan_text).unwrap();
        let output = String::from_utf8(strategy.into_output()).unwrap();
        (outcome, output)
    }

    #[test]
    fn test_approve() {
        let (outcome, output) = run("YES\n", "step A1");
        assert_eq!(outcome, StrategyOutcome::Approve);
        assert!(output.contains("plans/orders.md"));
    }

    #[test]
    fn test_reject_with_feedback() {
        let (outcome, _) = run("no\nsplit the auth step\n", "step A1");
        assert_eq!(
            outcome,
            StrategyOutcome::Reject {
                feedback: Some("split the auth step".into())
            }
        );
    }

    #[test]
    fn test_reject_without_feedback() {
        let (outcome, _) = run("decline\n\n", "step A1");
        assert_eq!(outcome, StrategyOutcome::Reject { feedback: None });
    }

    #[test]
    fn test_eof_is_rejection() {
        let (outcome, output) = run("maybe\n", "step A1");
        assert_eq!(outcome, StrategyOutcome::Reject { feedback: None });
        assert!(output.contains("Unrecognised input 'maybe'"));
    }

    #[test]
    fn test_preview_is_truncated_and_view_reprints() {
        let plan: String = (1..=80).map(|i| format!("line {}\n", i)).collect();
        let (outcome, output) = run("view\ny\n", &plan);
        assert_eq!(outcome, StrategyOutcome::Approve);
        assert!(output.contains("[20 more lines"));
        // line 80 only appears once 'view' reprints the whole plan
        assert_eq!(output.matches("line 80\n").count(), 1);
        assert_eq!(output.matches("line 1\n").count(), 2);
    }
}
