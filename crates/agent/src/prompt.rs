//! Text the agent sends to the model

use protocol::ScenarioSpec;

/// Sent once after a reply that could not be parsed
pub const PARSE_CORRECTION: &str = "Your previous reply could not be parsed as an action. \
Respond with ONLY a JSON object of the form \
{\"observation\": \"...\", \"reasoning\": \"...\", \"action\": \"...\", \"actionArgs\": {...}} \
and nothing else.";

pub fn system_prompt(scenario: &ScenarioSpec) -> String {
    format!(
        r#"You are a QA engineer verifying a feature of a web application in a real browser.

Scenario: {title}
{description}

Each turn you receive a screenshot of the current page together with its URL and title. Choose the single next action that moves the verification forward. When you have seen enough to judge the scenario, finish with the "done" action.

Available actions:
- click: {{"selector": "<CSS selector, or the visible text of the element>"}}
- type: {{"selector": "<CSS selector of a form field>", "text": "<text to enter>"}}
- scroll: {{"direction": "up" | "down", "amount": <pixels, default 500>}}
- navigate: {{"url": "<absolute URL or a path on the application>"}}
- wait: {{"ms": <milliseconds, at most 5000>}}
- done: {{"verdict": "passed" | "failed", "summary": "<one or two sentences>"}}

Respond with ONLY a JSON object, no prose around it:
{{"observation": "<what you see>", "reasoning": "<why this action>", "action": "<action name>", "actionArgs": {{...}}}}"#,
        title = scenario.title,
        description = scenario.description,
    )
}

/// Caption accompanying each screenshot
pub fn observation(step_index: u32, max_iterations: u32, url: &str, title: &str) -> String {
    format!(
        "Step {} of at most {}.\nCurrent URL: {}\nPage title: {}\nWhat is the next action?",
        step_index + 1,
        max_iterations,
        url,
        title
    )
}

/// Fed back when an action fails, so the model can adapt
pub fn action_failed(action: &str, error: &str) -> String {
    format!(
        "The {} action failed: {}. The next screenshot shows the current state; choose a different action.",
        action, error
    )
}
