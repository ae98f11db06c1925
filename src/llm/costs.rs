//! Approximate per-token pricing for the models we route to.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Prices in USD per million tokens: (model prefix, input, output).
const PRICING: &[(&str, Decimal, Decimal)] = &[
    ("anthropic/claude-3.5-sonnet", dec!(3), dec!(15)),
    ("anthropic/claude-sonnet-4", dec!(3), dec!(15)),
    ("anthropic/claude-3.5-haiku", dec!(0.8), dec!(4)),
    ("openai/gpt-4o-mini", dec!(0.15), dec!(0.6)),
    ("openai/gpt-4o", dec!(2.5), dec!(10)),
    ("x-ai/grok-4", dec!(3), dec!(15)),
    ("google/gemini-2.5-flash", dec!(0.3), dec!(2.5)),
];

/// Per-token (input, output) cost for `model`, if it is in the table.
///
/// Matches on prefix so dated variants (`...-20250514`) resolve too.
pub fn model_cost(model: &str) -> Option<(Decimal, Decimal)> {
    let per_million = dec!(1000000);
    PRICING
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| (*input / per_million, *output / per_million))
}

/// Fallback when the model is unknown: priced like a mid-tier model.
pub fn default_cost() -> (Decimal, Decimal) {
    let per_million = dec!(1000000);
    (dec!(3) / per_million, dec!(15) / per_million)
}

/// Estimated USD cost of one call.
pub fn estimate(cost_per_token: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    let (input, output) = cost_per_token;
    input * Decimal::from(input_tokens) + output * Decimal::from(output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_resolves_by_prefix() {
        let (input, output) = model_cost("anthropic/claude-sonnet-4-20250514").unwrap();
        assert_eq!(input, dec!(0.000003));
        assert_eq!(output, dec!(0.000015));
    }

    #[test]
    fn gpt_4o_mini_is_not_shadowed_by_gpt_4o() {
        let (input, _) = model_cost("openai/gpt-4o-mini").unwrap();
        assert_eq!(input, dec!(0.00000015));
    }

    #[test]
    fn unknown_model_is_none() {
        assert!(model_cost("someone/new-model").is_none());
    }

    #[test]
    fn estimate_sums_both_directions() {
        let cost = estimate((dec!(0.000003), dec!(0.000015)), 1000, 100);
        assert_eq!(cost, dec!(0.0045));
    }
}
