//! Directive and continuation wording.
//!
//! The system directive is rebuilt for every model invocation. Its tone
//! tightens as iterations pass: early on the model is encouraged to fetch
//! what it needs, later it is told to work from data already retrieved, and
//! on the final invocation it has no tools at all.

use quarry_config::OrchestratorConfig;

use crate::query_mode::QueryMode;

/// Record-limit hint for an iteration (1-based).
///
/// `initial_limit * multiplier^(iteration-1)`, capped at `max_record_limit`.
pub fn record_limit(iteration: u32, config: &OrchestratorConfig) -> u64 {
    let exponent = iteration.saturating_sub(1).min(i32::MAX as u32) as i32;
    let limit = config.initial_record_limit as f64 * config.limit_multiplier.powi(exponent);
    let cap = config.max_record_limit;
    if !limit.is_finite() || limit >= cap as f64 {
        cap
    } else {
        limit.round() as u64
    }
}

/// Inputs for one invocation's directive.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveInput {
    pub mode: QueryMode,
    pub iteration: u32,
    pub max_iterations: u32,
    pub record_limit: u64,
    /// False on the final invocation: no tool schemas are offered
    pub tools_offered: bool,
}

pub fn system_directive(input: &DirectiveInput) -> String {
    let mut out = String::from(
        "You answer questions using data returned by tools. Report only what the tool \
         results contain. Never invent, estimate, or fill in numbers, names, or dates.\n",
    );

    match input.mode {
        QueryMode::Simple => out.push_str(
            "This is a direct lookup. Fetch the data you need, then answer briefly.\n",
        ),
        QueryMode::Analytical => out.push_str(
            "This is an analytical question. Gather the data each part of the question needs, \
             then compare, explain, and cite the figures you used.\n",
        ),
    }

    if !input.tools_offered {
        out.push_str(
            "No more tools are available. Write the final answer now using only data already \
             retrieved. If something could not be retrieved, say so plainly.\n",
        );
    } else if input.iteration <= 1 {
        out.push_str(&format!(
            "When a tool accepts a limit, request at most {} records.\n",
            input.record_limit
        ));
    } else {
        out.push_str(&format!(
            "Iteration {} of {}. Use the data already fetched wherever it answers the question. \
             Call a tool again only for data you do not have yet, with a limit of at most {} \
             records. Do not repeat a call with the same parameters.\n",
            input.iteration, input.max_iterations, input.record_limit
        ));
    }

    out
}

/// What the last tool round looked like.
#[derive(Debug, Clone, Copy)]
pub struct ContinuationInput {
    pub mode: QueryMode,
    pub any_failed: bool,
    pub any_empty: bool,
    pub next_is_final: bool,
}

/// The user-role instruction appended after a tool round.
pub fn continuation_instruction(input: &ContinuationInput) -> String {
    let mut parts: Vec<&str> = Vec::new();

    if input.any_failed {
        parts.push(
            "Some tools failed. For those sources, tell the user the data is unavailable. \
             Do not guess what they would have returned.",
        );
    }
    if input.any_empty {
        parts.push(
            "Some tools returned nothing. State that no data is available for those requests.",
        );
    }

    if input.next_is_final {
        parts.push("Now write your final answer from the results above. No further tools can be called.");
    } else {
        match input.mode {
            QueryMode::Simple => parts.push(
                "If the results above answer the question, answer now. Otherwise call the tool \
                 you still need.",
            ),
            QueryMode::Analytical => parts.push(
                "Check whether every part of the question is covered. Fetch only what is still \
                 missing; otherwise write the analysis.",
            ),
        }
    }

    parts.join(" ")
}
