//! Prompts and canned replies.
//!
//! Every piece of text sent to the model, and every reply the session
//! produces without the model, lives here so prompt changes stay in one
//! place and tests can inspect them directly.
//!
//! The "state unavailability instead of guessing" rule is a prompt-level
//! contract: no code checks the model's numbers, so the instruction must
//! stay in both [`DEFAULT_SYSTEM_PROMPT`] and [`consolidation_prompt`].

use crate::evidence::Fragment;

/// System prompt sent with every page request.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an intelligent construction assistant that analyzes construction plans.
Give numerical answers to the user query. Do not guess and do not provide irrelevant information.

Include:
- Values, with their context, that match the user query.
- Brief and accurate summaries tied directly to the document's content.

If specific data is not available on the page, state that it is unavailable in the document."#;

/// Query run automatically, once, when a document is ingested.
pub const BOOTSTRAP_QUERY: &str = r#"Please review the provided construction plan document and prepare a comprehensive report that captures the square footage for the following materials and components. Give only numerical values that accurately match the provided context:

1. Sheetrock (Sheetrock: Length x Width)
2. Concrete (Concrete: Length x Width = A, Depth of Concrete)
3. Roofing (Roofing: Length x Width = A (Pitch Factor) = B)
   Break the roofing down by subtype:
   - Shingle roofing
   - Modified bitumen
   - TPO (Thermoplastic Polyolefin)
   - Metal R panel
   - Standing seam
4. Structural steel (Structural Steel: Length x Width = C, Average Height)

The plan may consist of multiple sections or phases. Make sure the square footage calculations include all relevant areas. If there are multiple entries for a material, combine them into a total square footage.

Along with the square footage, include a brief summary of the overall construction plan, highlighting:
- Materials used
- Phases of construction outlined
- Noteworthy specifications or design elements

Only include sections that contain relevant data. If no data is available for a category, omit that category entirely."#;

/// Default tag prefixed to each evidence record in flattened corpus text.
pub const DEFAULT_EVIDENCE_MARKER: &str = "=== page evidence ===\n";

/// Reply used when there is no evidence to synthesize from.
pub const NO_DATA_RESPONSE: &str =
    "No data is available: the document produced no evidence for this question.";

/// Reply used when the consolidation request fails.
pub const SYNTHESIS_FAILED_RESPONSE: &str =
    "Sorry, I could not generate a combined answer for this question. Please try again.";

/// Extra instructions appended in [`crate::config::ReportFormat::Json`] mode.
pub const JSON_REPORT_SUFFIX: &str = r#"

**Output format:**
Respond with a single JSON object and nothing else, shaped as:
{
  "materials": [
    {"name": "<material>", "subtype": "<subtype or null>", "square_feet": <number or null>, "details": "<dimensions or notes>"}
  ],
  "summary": "<short narrative of the plan>",
  "unavailable": ["<requested items not found in the document>"]
}"#;

/// Build the consolidation request that merges evidence into one answer.
///
/// Fragments are numbered in the order given, with their page span when
/// known, so the model can keep per-page values apart while merging.
pub fn consolidation_prompt(query: &str, fragments: &[Fragment]) -> String {
    let mut responses = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        responses.push_str(&format!("Response {}", i + 1));
        if let Some(label) = fragment.page_label() {
            responses.push_str(&format!(" ({label})"));
        }
        responses.push_str(":\n");
        responses.push_str(fragment.text.trim());
        responses.push_str("\n\n");
    }

    format!(
        r#"Given the following user query and multiple responses, identify and combine the most relevant portions of the responses to provide a comprehensive and informative answer.

**User Query:**
{query}

**Multiple Responses:**
{responses}**Guidelines:**
* Prioritize accuracy and relevance to the user's query.
* Combine information from multiple responses if necessary.
* Avoid redundancy and repetition.
* If the responses do not contain the requested data, state that it is unavailable in the document. Do not invent values.
* Present the information in a clear and concise manner.

**Output:**
A single, coherent response that addresses the user's query effectively."#,
        query = query.trim(),
        responses = responses,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_forbids_fabrication() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("unavailable in the document"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Do not guess"));
    }

    #[test]
    fn bootstrap_query_covers_materials() {
        for material in ["Sheetrock", "Concrete", "Roofing", "Structural steel", "TPO"] {
            assert!(BOOTSTRAP_QUERY.contains(material), "missing {material}");
        }
    }

    #[test]
    fn consolidation_prompt_numbers_fragments() {
        let fragments = vec![
            Fragment::new(0, Some(0..1), "Concrete: 500 sqft"),
            Fragment::new(1, None, "Roofing: 1200 sqft"),
        ];
        let prompt = consolidation_prompt("  concrete area? ", &fragments);
        assert!(prompt.contains("**User Query:**\nconcrete area?\n"));
        assert!(prompt.contains("Response 1 (page 1):\nConcrete: 500 sqft"));
        assert!(prompt.contains("Response 2:\nRoofing: 1200 sqft"));
        assert!(prompt.contains("unavailable in the document"));
    }

    #[test]
    fn json_suffix_names_fields() {
        assert!(JSON_REPORT_SUFFIX.contains("\"materials\""));
        assert!(JSON_REPORT_SUFFIX.contains("\"unavailable\""));
    }
}
