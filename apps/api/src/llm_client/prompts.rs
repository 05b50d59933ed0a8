// Prompt constants for the gap narrative call.
// Placeholders are filled by `pipeline::gap::build_gap_prompt`.

pub const GAP_ANALYSIS_SYSTEM: &str = "You are an experienced technical recruiter \
    comparing a candidate resume against a job description. \
    You MUST respond with valid JSON only, using exactly the keys \
    \"strengths\", \"gaps\", \"improvements\" (arrays of short strings) and \
    \"assessment\" (one paragraph). Do NOT use markdown code fences.";

pub const GAP_ANALYSIS_PROMPT_TEMPLATE: &str = "\
Semantic similarity between resume and job description: {similarity_raw}% \
(calibrated score {similarity_transformed}%).
Keyword coverage: {coverage_percentage}% ({covered_count} of {total_keywords}).
Covered keywords: {covered_keywords}
Missing keywords: {missed_keywords}

JOB DESCRIPTION:
{job_description}

RESUME:
{resume}

Identify the candidate's strengths for this role, the concrete gaps, and \
specific improvements to the resume. Base every point on the texts above.";
