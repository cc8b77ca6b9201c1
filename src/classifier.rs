//! Intent classifier: decides which store answers a question.
//!
//! The completion service is asked for a single bare label. Its reply is
//! mapped by substring containment in a fixed priority order, so verbose
//! replies such as `"Category: Policy."` still route correctly:
//!
//! | Reply contains | Route |
//! |----------------|-------|
//! | `policy` | [`Route::Document`] |
//! | `data` | [`Route::Tabular`] |
//! | `hybrid` or `both` | [`Route::Hybrid`] |
//! | anything else | [`Route::Unknown`] |
//!
//! A reply naming several categories takes the first match in this table.

use anyhow::Result;

use crate::llm::TextCompletion;
use crate::models::Route;

const ROUTER_PROMPT: &str = "You are a router for an HR assistant. Classify the user's question into exactly one category:

- 'policy': questions about company rules, guidelines, benefits, maternity leave, code of conduct, or any other policy document.
- 'data': questions about specific employees, attendance, leave balances, headcounts, or statistics from HR records.
- 'hybrid': questions that need both, for example \"Is John's leave valid according to policy?\"

Do not answer the question. Just output 'policy', 'data', or 'hybrid'.

Question: {question}
Category:";

pub fn router_prompt(question: &str) -> String {
    ROUTER_PROMPT.replace("{question}", question)
}

/// Map a raw classifier reply to a route.
pub fn parse_route(reply: &str) -> Route {
    let label: String = reply
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`'))
        .collect();

    if label.contains("policy") {
        Route::Document
    } else if label.contains("data") {
        Route::Tabular
    } else if label.contains("hybrid") || label.contains("both") {
        Route::Hybrid
    } else {
        Route::Unknown
    }
}

/// Classify `question`. Completion failures are returned to the caller.
pub async fn classify(llm: &dyn TextCompletion, question: &str) -> Result<Route> {
    let reply = llm.complete(&router_prompt(question)).await?;
    let route = parse_route(&reply);
    tracing::debug!(reply = %reply.trim(), route = %route, "question classified");
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn policy_wins_regardless_of_case_or_quotes() {
        for reply in [
            "policy",
            "POLICY",
            "'policy'",
            "\"Policy\"",
            "Category: Policy.",
            "this could be policy or data",
            "hybrid policy",
        ] {
            assert_eq!(parse_route(reply), Route::Document, "{reply}");
        }
    }

    #[test]
    fn data_without_policy_is_tabular() {
        for reply in ["data", "'DATA'", "Data lookup", "data, maybe hybrid"] {
            assert_eq!(parse_route(reply), Route::Tabular, "{reply}");
        }
    }

    #[test]
    fn hybrid_or_both() {
        for reply in ["hybrid", "`Hybrid`", "both", "It needs BOTH."] {
            assert_eq!(parse_route(reply), Route::Hybrid, "{reply}");
        }
    }

    #[test]
    fn anything_else_is_unknown() {
        for reply in ["", "  ", "weather", "I cannot help with that"] {
            assert_eq!(parse_route(reply), Route::Unknown, "{reply}");
        }
    }

    #[test]
    fn prompt_embeds_question() {
        let prompt = router_prompt("Who is E1001?");
        assert!(prompt.ends_with("Question: Who is E1001?\nCategory:"));
        assert!(prompt.contains("Just output 'policy', 'data', or 'hybrid'."));
    }

    struct Fixed(Result<&'static str, &'static str>);

    #[async_trait]
    impl TextCompletion for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            match self.0 {
                Ok(s) => Ok(s.to_string()),
                Err(e) => anyhow::bail!(e),
            }
        }
    }

    #[tokio::test]
    async fn classify_propagates_completion_errors() {
        assert_eq!(
            classify(&Fixed(Ok(" Data\n")), "q").await.unwrap(),
            Route::Tabular
        );
        let err = classify(&Fixed(Err("connection refused")), "q")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
