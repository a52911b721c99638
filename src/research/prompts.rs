//! Prompt templates and the structured replies they ask for.

use crate::research::state::SubTopic;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============= Structured outputs =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchQuery {
    /// Query string to send to the search provider
    pub search_query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Queries {
    pub queries: Vec<SearchQuery>,
}

impl Queries {
    /// Non-empty query strings, at most `limit` of them.
    pub fn into_strings(self, limit: usize) -> Vec<String> {
        self.queries
            .into_iter()
            .map(|q| q.search_query.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(limit)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedSection {
    pub name: String,
    /// What the section covers
    pub description: String,
    /// Search provider ids to research this section with
    #[serde(default)]
    pub search_options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportPlan {
    pub sections: Vec<PlannedSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionGrade {
    /// "pass" if the section covers its topic, otherwise "fail"
    pub grade: Grade,
    /// Queries that would fill the gaps of a failing section
    #[serde(default)]
    pub follow_up_queries: Vec<SearchQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubTopicPlan {
    pub subtopics: Vec<SubTopic>,
}

// ============= System prompts =============

pub const QUERY_WRITER_SYSTEM: &str =
    "You write precise search queries that gather evidence for a research report.";

pub const PLANNER_SYSTEM: &str = "You plan the structure of research reports.";

pub const GRADER_SYSTEM: &str =
    "You review one section of a research report and decide whether it covers its topic.";

pub const SUBTOPIC_PLANNER_SYSTEM: &str =
    "You pick subtopics that deserve a closer look within one section of a research report.";

const CITATION_RULES: &str = "<Citation Rules>
- Cite inline by embedding links in Markdown: [text](URL).
- Every citation must correspond to a source URL from the source material.
- For local documents without a web URL, name the document instead of linking it.
- Do not use numbered superscripts such as [1].
- Do not add a reference list; references are compiled separately.
</Citation Rules>";

pub fn introduction_writer_system(max_words: usize, language: &str) -> String {
    format!(
        "You are writing the introduction of a research report.
Give background on the topic, say why it matters and outline the scope of the report.
Keep it to about {max_words} words and write in {language}.
Do not start with a heading.

{CITATION_RULES}"
    )
}

pub fn section_writer_system(max_words: usize, language: &str) -> String {
    format!(
        "You are writing one section of a research report.
<Guidelines>
- If existing section content is given, merge it with the new source material instead of starting over.
- Start with the section title as a level-2 Markdown heading (##).
- Use short paragraphs and plain language.
- Keep the section to about {max_words} words and write in {language}.
- Every claim must be grounded in the source material.
</Guidelines>

{CITATION_RULES}"
    )
}

pub fn subsection_writer_system(max_words: usize, language: &str) -> String {
    format!(
        "You are writing a subsection of a research report that deepens one of its sections.
Start with the subtopic name as a level-3 Markdown heading (###).
Present facts from the search results only, keep it to about {max_words} words and write in {language}.
The subsection must read as part of the parent section.

{CITATION_RULES}"
    )
}

pub fn conclusion_writer_system(is_question: bool, max_words: usize, language: &str) -> String {
    let task = if is_question {
        "The report topic is a question. Answer it directly, drawing on the sections, and keep the answer focused on the most relevant evidence."
    } else {
        "Summarize the key findings across all sections as a cohesive synthesis rather than a recap of each section. Include one structural element, either a short bullet list or a small table, that distills the main points."
    };
    format!(
        "You are writing the conclusion of a research report.
{task}
Keep it to about {max_words} words, write in {language}, and do not start with a heading.

{CITATION_RULES}"
    )
}

// ============= User prompts =============

pub fn introduction_query_prompt(topic: &str, number_of_queries: usize, guidelines: &str) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Task>
Generate {number_of_queries} search queries that gather background and context for the introduction of a report on this topic.
Prefer overview material over narrow details.
</Task>

<Search provider guidelines>
{guidelines}
</Search provider guidelines>"
    )
}

pub fn introduction_writer_prompt(topic: &str, context: &str) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Source material>
{context}
</Source material>"
    )
}

pub fn planner_query_prompt(
    topic: &str,
    report_structure: &str,
    number_of_queries: usize,
    guidelines: &str,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Report organization>
{report_structure}
</Report organization>

<Task>
Generate {number_of_queries} search queries that help plan the sections of this report.
The queries should cover the breadth the report organization asks for.
</Task>

<Search provider guidelines>
{guidelines}
</Search provider guidelines>"
    )
}

pub struct PlanPromptInput<'a> {
    pub topic: &'a str,
    pub report_structure: &'a str,
    pub context: &'a str,
    /// `- id: description` lines for the providers the job may use
    pub providers: &'a str,
    pub feedback: Option<&'a str>,
    pub is_question: bool,
}

pub fn report_plan_prompt(input: &PlanPromptInput<'_>) -> String {
    let PlanPromptInput {
        topic,
        report_structure,
        context,
        providers,
        feedback,
        is_question,
    } = input;

    let task = if *is_question {
        "Plan a report that answers the question. Identify the components the answer depends on and design sections that build toward it, without omitting anything critical."
    } else {
        "Plan a tight, focused report. Each section must have a distinct purpose with no overlap; fold examples and implementation details into the main topic sections."
    };
    let feedback = feedback.unwrap_or("(none)");

    format!(
        "<Report topic>
{topic}
</Report topic>

<Report organization>
{report_structure}
</Report organization>

<Context>
{context}
</Context>

<Available search providers>
{providers}
</Available search providers>

<Task>
{task}
For each section give a name, a short description of what it covers, and the search providers (by id, from the list above) best suited to research it.
Do not include introduction or conclusion sections; they are written separately.
</Task>

<Feedback>
Reviewer feedback on the previous plan:
{feedback}
</Feedback>"
    )
}

pub fn section_query_prompt(
    topic: &str,
    section_name: &str,
    section_description: &str,
    provider_id: &str,
    guidelines: &str,
    number_of_queries: usize,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Section topic>
{section_name}: {section_description}
</Section topic>

<Search provider>
{provider_id}
</Search provider>

<Task>
Generate {number_of_queries} search queries for the {provider_id} provider that together cover different aspects of the section topic.
</Task>

<Search provider guidelines>
{guidelines}
</Search provider guidelines>"
    )
}

pub fn section_writer_prompt(
    topic: &str,
    section_name: &str,
    section_description: &str,
    existing_content: &str,
    context: &str,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Section name>
{section_name}
</Section name>

<Section topic>
{section_description}
</Section topic>

<Existing section content>
{existing_content}
</Existing section content>

<Source material>
{context}
</Source material>"
    )
}

pub fn section_grader_prompt(
    topic: &str,
    section_description: &str,
    content: &str,
    number_of_queries: usize,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Section topic>
{section_description}
</Section topic>

<Section content>
{content}
</Section content>

<Task>
Grade whether the section content adequately addresses the section topic.
If it does not, provide {number_of_queries} follow-up search queries that would gather the missing information.
</Task>"
    )
}

pub fn subtopic_planner_prompt(
    topic: &str,
    section_name: &str,
    content: &str,
    breadth: usize,
    depth: u32,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Section name>
{section_name}
</Section name>

<Section content>
{content}
</Section content>

<Current depth>
{depth}
</Current depth>

<Task>
Identify {breadth} specific, non-overlapping subtopics that explore this section more deeply.
For each give a name, why it matters, and the key questions to investigate.
</Task>"
    )
}

pub fn subtopic_query_prompt(
    topic: &str,
    section_name: &str,
    subtopic: &SubTopic,
    provider_id: &str,
    guidelines: &str,
    number_of_queries: usize,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Section name>
{section_name}
</Section name>

<Subtopic>
Name: {name}
Description: {description}
Key questions: {questions}
</Subtopic>

<Search provider>
{provider_id}
</Search provider>

<Task>
Generate {number_of_queries} standalone search queries for the {provider_id} provider that dig into this subtopic from different angles.
</Task>

<Search provider guidelines>
{guidelines}
</Search provider guidelines>",
        name = subtopic.name,
        description = subtopic.description,
        questions = subtopic.key_questions.join("; "),
    )
}

pub fn subsection_writer_prompt(
    topic: &str,
    section_name: &str,
    subtopic: &SubTopic,
    context: &str,
) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Main section>
{section_name}
</Main section>

<Subtopic>
{name}
{description}
</Subtopic>

<Search results>
{context}
</Search results>",
        name = subtopic.name,
        description = subtopic.description,
    )
}

pub fn conclusion_writer_prompt(topic: &str, sections: &str) -> String {
    format!(
        "<Report topic>
{topic}
</Report topic>

<Section contents>
{sections}
</Section contents>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_of<T: JsonSchema>() -> String {
        serde_json::to_string_pretty(&schemars::schema_for!(T)).unwrap()
    }

    #[test]
    fn test_schema_titles_are_distinct() {
        assert!(schema_of::<Queries>().contains("\"title\": \"Queries\""));
        assert!(schema_of::<ReportPlan>().contains("\"title\": \"ReportPlan\""));
        assert!(schema_of::<SectionGrade>().contains("\"title\": \"SectionGrade\""));
        assert!(schema_of::<SubTopicPlan>().contains("\"title\": \"SubTopicPlan\""));
        assert!(!schema_of::<SectionGrade>().contains("\"title\": \"Queries\""));
    }

    #[test]
    fn test_queries_are_trimmed_and_limited() {
        let queries = Queries {
            queries: vec![
                SearchQuery {
                    search_query: " rust async ".into(),
                },
                SearchQuery {
                    search_query: "   ".into(),
                },
                SearchQuery {
                    search_query: "tokio scheduler".into(),
                },
                SearchQuery {
                    search_query: "io_uring".into(),
                },
            ],
        };
        assert_eq!(
            queries.into_strings(2),
            vec!["rust async".to_string(), "tokio scheduler".to_string()]
        );
    }

    #[test]
    fn test_grade_parses_lowercase() {
        let grade: SectionGrade =
            serde_json::from_str(r#"{"grade": "fail", "follow_up_queries": []}"#).unwrap();
        assert_eq!(grade.grade, Grade::Fail);
    }

    #[test]
    fn test_plan_prompt_switches_on_question() {
        let mut input = PlanPromptInput {
            topic: "Is Rust fast?",
            report_structure: "structure",
            context: "ctx",
            providers: "- duckduckgo: web",
            feedback: None,
            is_question: true,
        };
        assert!(report_plan_prompt(&input).contains("answers the question"));
        input.is_question = false;
        input.feedback = Some("merge sections 2 and 3");
        let prompt = report_plan_prompt(&input);
        assert!(prompt.contains("tight, focused"));
        assert!(prompt.contains("merge sections 2 and 3"));
    }
}
