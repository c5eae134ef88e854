use regex::Regex;
use serde::{Deserialize, Serialize};

/// Outcome of parsing a debugging reply: plain-language explanation plus,
/// when the model supplied one, a fence-stripped corrected snippet.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebugAdvice {
    pub explanation: Option<String>,
    pub corrected_code: Option<String>,
}

pub fn suggest_tasks_prompt(columns: &[String], goal: &str) -> String {
    format!(
        r#"You are Galileo, a data science tutor guiding a student through exploring a dataset.
The dataset is loaded as a pandas DataFrame named 'df' with these columns: {cols:?}.
The student's goal is: "{goal}".

Suggest up to 5 concrete analysis steps that move the student toward that goal.
Each step must be something a short Python snippet over 'df' could do (a plot,
a summary, a cleaning step). Reply with one step per line and nothing else:
no numbering, no introduction, no closing remarks."#,
        cols = columns,
        goal = goal,
    )
}

pub fn synthesize_code_prompt(task: &str, columns: &[String]) -> String {
    format!(
        r#"You are a data science assistant. Given a pandas DataFrame named 'df',
write a Python script using seaborn and matplotlib to: {task}.
The dataframe 'df' has the following columns: {cols:?}.

Important Rules:
- The dataframe is already loaded in a variable named `df`.
- Assume `import matplotlib.pyplot as plt` and `import seaborn as sns` are done.
- Provide ONLY the Python code, without any explanation, comments, or markdown formatting.
- Use seaborn for plotting if possible. Add a title to the plot."#,
        task = task,
        cols = columns,
    )
}

pub fn explain_code_prompt(code: &str) -> String {
    format!(
        r#"You are a friendly Python tutor. A student is learning data analysis.
Explain in simple, encouraging terms what the following code does, step by step:

--- CODE ---
{code}
--- END CODE ---

Keep the explanation short and concrete."#,
        code = code,
    )
}

pub fn debug_prompt(goal: &str, code: &str, error: &str) -> String {
    format!(
        r#"You are a friendly Python tutor. A student is learning data visualization.
Their goal was to: "{goal}".

They wrote the following code:
--- CODE ---
{code}
--- END CODE ---

But it produced this error:
--- ERROR ---
{error}
--- END ERROR ---

Please explain the error in simple, encouraging terms. Then, provide the corrected, complete Python code block.
Structure your response with "Explanation:" and "Corrected Code:"."#,
        goal = goal,
        code = code,
        error = error,
    )
}

pub fn enhance_goal_prompt(statement: &str) -> String {
    format!(
        r#"A student stated this data-analysis goal: "{statement}".
Rewrite it as one clear, specific, measurable analysis objective.
Reply with the rewritten goal only, as a single sentence with no preamble."#,
        statement = statement,
    )
}

/// Splits a line-delimited task reply into discrete task strings.
/// Numbered and bulleted prefixes are stripped; empty lines are dropped.
/// No further validation; garbage lines come through verbatim.
pub fn parse_task_lines(reply: &str) -> Vec<String> {
    let prefix = Regex::new(r"^\s*(?:\d+\s*[.)]\s*|[-*]\s+)").unwrap();
    reply
        .lines()
        .map(|line| prefix.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Removes a leading markdown fence (with any language tag) and a trailing
/// fence from a model reply. Unfenced text passes through unchanged.
pub fn strip_code_fences(reply: &str) -> String {
    let mut s = reply.trim();
    while s.starts_with("```") {
        // drop the whole fence line, language tag included
        s = match s.find('\n') {
            Some(i) => s[i + 1..].trim_start(),
            None => "",
        };
    }
    while s.trim_end().ends_with("```") {
        let t = s.trim_end();
        s = t[..t.len() - 3].trim_end();
    }
    s.trim().to_string()
}

/// Splits an "Explanation:" / "Corrected Code:" structured reply. Replies
/// missing the code heading are treated as explanation-only.
pub fn parse_debug_reply(reply: &str) -> DebugAdvice {
    let heading = Regex::new(r"(?i)corrected\s+code:").unwrap();
    match heading.find(reply) {
        Some(m) => {
            let explanation = clean_explanation(&reply[..m.start()]);
            let code = strip_code_fences(&reply[m.end()..]);
            DebugAdvice {
                explanation: non_empty(explanation),
                corrected_code: non_empty(code),
            }
        }
        None => DebugAdvice {
            explanation: non_empty(clean_explanation(reply)),
            corrected_code: None,
        },
    }
}

fn clean_explanation(text: &str) -> String {
    let heading = Regex::new(r"(?i)^\s*explanation:\s*").unwrap();
    heading.replace(text.trim(), "").trim().to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
