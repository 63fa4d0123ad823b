/// Prompt asking the model to turn a question into the intent JSON shape.
pub fn intent_prompt(schema_description: &str, current_date: &str, question: &str) -> String {
    format!(
        r#"You are an expert at turning questions into structured SQL query plans.

AVAILABLE DATABASE SCHEMA:
{schema_description}

CURRENT DATE: {current_date}

Read the user's question and extract what is needed to build a SQL query.
Resolve relative dates such as "last month", "this year" or "last quarter"
into exact dates using the current date.

USER QUESTION:
{question}

Reply ONLY with valid JSON, no text before or after, in this shape:
{{
    "tables": ["table1", "table2"],
    "select_columns": ["col1", "col2"],
    "aggregations": [
        {{"func": "SUM|COUNT|COUNT DISTINCT|AVG|MAX|MIN", "column": "column or *", "alias": "name"}}
    ],
    "filters": [
        {{"column": "column", "operator": "=|!=|>|<|>=|<=|LIKE|ILIKE|IN|NOT IN|BETWEEN|IS NULL|IS NOT NULL", "value": "value"}}
    ],
    "joins": [
        {{"table1": "t1", "col1": "c1", "table2": "t2", "col2": "c2"}}
    ],
    "group_by": ["col1"],
    "order_by": [
        {{"column": "column", "direction": "ASC|DESC"}}
    ],
    "limit": null,
    "date_range": {{
        "start_date": "YYYY-MM-DD or null",
        "end_date": "YYYY-MM-DD or null",
        "period_description": "description"
    }},
    "confidence": 0.0,
    "reasoning": "short explanation"
}}

RULES:
1. Only use tables and columns that exist in the schema.
2. When the question is ambiguous, prefer the most common interpretation.
3. For "how many" questions use COUNT with column "*".
4. For "total" or "sum" questions use SUM.
5. IN and NOT IN take a JSON array; BETWEEN takes a two-element array.
6. If no order is requested, order by the most relevant column DESC.
"#
    )
}

/// Prompt asking the model whether a message needs a data query.
pub fn detection_prompt(message: &str) -> String {
    format!(
        r#"You classify messages sent to a data analysis assistant.

Decide whether the user wants to query data from a database.

MESSAGES THAT NEED DATA:
- Questions about quantities, totals, sums or averages
- Comparisons between categories or periods
- Rankings (top, highest, lowest, sorted)
- Trends over time
- Specific filters ("open tickets", "equipment with failures")
- Record listings

MESSAGES THAT DO NOT NEED DATA:
- Greetings or small talk
- General questions about the system
- Requests for help or explanations
- Theoretical questions

USER MESSAGE:
{message}

Reply ONLY with valid JSON, no text before or after:
{{
    "requires_data": true,
    "confidence": 0.0,
    "reasoning": "short explanation"
}}
"#
    )
}

/// Prompt asking the model to answer the question from query results.
pub fn answer_prompt(
    question: &str,
    query_description: &str,
    results: &str,
    row_count: usize,
    columns: &[String],
) -> String {
    format!(
        r#"You are a data analysis assistant. A query was run to answer the user's question.

ORIGINAL QUESTION:
{question}

QUERY RUN:
{query_description}

DATA RETURNED:
{results}

METADATA:
- Rows returned: {row_count}
- Columns: {columns}

Write a clear, professional answer that:
1. Answers the question directly
2. Presents the data legibly (use a markdown table for several rows)
3. Points out relevant insights when the data allows it
4. Is concise but complete

If the data is empty, say that no results were found and suggest likely
reasons (wrong period, overly strict filter).

Do not invent data. Only use the data provided.
"#,
        columns = columns.join(", ")
    )
}
