use crate::options::SearchProvider;
use crate::search::rank_by_score;
use crate::SearchResult;

pub const NO_RESULTS_LINE: &str = "No search results found.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Append answering guidelines after the user's question.
    pub answer_guidelines: bool,
}

/// First label of the host, without `www.`: `https://www.example.com/x` -> `example`.
pub fn bare_domain(raw: &str) -> String {
    let Ok(u) = url::Url::parse(raw) else {
        return String::new();
    };
    let Some(host) = u.host_str() else {
        return String::new();
    };
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.split('.').next().unwrap_or_default().to_string()
}

fn relevance_pct(score: f64) -> i64 {
    (score * 100.0).round() as i64
}

fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS_LINE.to_string();
    }
    rank_by_score(results)
        .into_iter()
        .enumerate()
        .map(|(pos, i)| {
            let r = &results[i];
            format!(
                "[{}] \"{}\" (Relevance: {}%) from {}\n{}",
                pos + 1,
                r.title,
                relevance_pct(r.score),
                bare_domain(&r.url),
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn extracted_section(extracted_content: &str, provider: SearchProvider) -> String {
    if extracted_content.is_empty() {
        return String::new();
    }
    let label = match provider {
        SearchProvider::Tavily => "Additional extracted content:",
        SearchProvider::OpenPerplex => "LLM Response:",
    };
    format!("{label}\n{extracted_content}\n\n")
}

fn guidelines(provider: SearchProvider, results: &[SearchResult]) -> String {
    let ranked: Vec<&SearchResult> = rank_by_score(results).into_iter().map(|i| &results[i]).collect();
    let example_link = ranked
        .first()
        .map(|r| format!(", e.g. [Click here]({})", r.url))
        .unwrap_or_default();
    let example_sources = match ranked.as_slice() {
        [] => String::new(),
        [a] => format!(", e.g. [Source 1]({})", a.url),
        [a, b, ..] => format!(", e.g. [Source 1]({}), [Source 2]({})", a.url, b.url),
    };
    let provider_rules = match provider {
        SearchProvider::OpenPerplex => "\n5. For OpenPerplex responses:\n   - Incorporate the LLM response when relevant\n   - Balance between direct quotes and your own synthesis\n   - Cite sources while maintaining a natural flow",
        SearchProvider::Tavily => "",
    };
    format!(
        r#"Please provide a clear and focused response based on the {provider} search results above. Follow these guidelines:

1. For simple factual questions:
   - Give the direct answer immediately
   - Include the source reference as a hyperlink using the URL from result [index]{example_link}
   - Add some context to the answer, but keep it brief and to the point

2. For complex questions requiring explanation:
   - Start with a 1-2 sentence summary of the key point
   - Support main points with relevant source citations as hyperlinks{example_sources}
   - Break down complex topics into clear sections
   - Use bullet points for better readability
   - Keep explanations concise but thorough

3. For current events/news:
   - Lead with the most recent developments
   - Present events chronologically if relevant
   - Note the date/timeframe for each source (if available) with hyperlinked citations
   - Highlight any conflicting information between sources

4. For all responses:
   - Stay focused on answering the specific question asked
   - Use clear, simple language
   - Note any important limitations or uncertainties
   - Only include relevant information from the sources
   - Format source citations as Markdown hyperlinks using the URLs from the search results{provider_rules}

Please analyze the search results and provide your response following these guidelines."#,
        provider = provider.as_str(),
    )
}

/// Build the augmented prompt for the final generation call.
pub fn assemble(
    user_message: &str,
    refined_query: &str,
    results: &[SearchResult],
    extracted_content: &str,
    provider: SearchProvider,
    opts: AssembleOptions,
) -> String {
    let mut out = format!(
        "Here are the most relevant search results for your question about \"{refined_query}\":\n{}\n\n{}\n\nThe user asked: \"{user_message}\"",
        format_results(results),
        extracted_section(extracted_content, provider),
    );
    if opts.answer_guidelines {
        out.push_str("\n\n");
        out.push_str(&guidelines(provider, results));
    }
    out
}
