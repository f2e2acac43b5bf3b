//! Prompt text for the routing-failure analyst.

use crate::monitor::MessageMetadata;
use crate::tools::{tool_names, ToolName};

/// Role and failure-cause catalog given to the model on every call.
pub const SYSTEM_PROMPT: &str = "\
You are an expert system analyst specializing in message routing failure analysis.

Your role is to:
1. Analyze messages that failed to be routed properly
2. Identify the likely cause of routing failures
3. Provide specific recommendations for resolution
4. Send a notification with your findings

When analyzing messages, consider these common failure causes:
- Ambiguous intent - message could fit multiple categories
- Missing context - insufficient information to classify
- Data format issues - malformed or unexpected structure
- New content type - content not covered by existing rules
- Schema validation failures - data doesn't match expected format

Always use the available tools to complete your analysis and send notifications.";

/// Build the task for one failed message.
pub fn task_prompt(content: &str, metadata: &MessageMetadata) -> String {
    let headers =
        serde_json::to_string_pretty(&metadata.headers).unwrap_or_else(|_| "{}".to_owned());
    format!(
        "Analyze this failed message that failed to be routed properly, and generate a one \
         sentence summary of the likely cause of the routing failure.\n\n\
         Message: {content}\n\n\
         Metadata: Topic={}, Partition={}, Offset={}\n\n\
         Headers: {headers}\n\n\
         Always send a notification containing your analysis and summary of the likely cause \
         of the routing failure.",
        metadata.topic, metadata.partition, metadata.offset
    )
}

/// System prompt for the text tool protocol: the role plus the tool catalog
/// and the Thought/Action/Observation format.
pub fn react_system_prompt() -> String {
    let catalog: String = ToolName::ALL
        .iter()
        .map(|tool| {
            format!(
                "{}: {}\n  Arguments: {}\n",
                tool.as_str(),
                tool.description(),
                tool.input_schema()
            )
        })
        .collect();

    format!(
        "{SYSTEM_PROMPT}\n\n\
         You have access to the following tools:\n\n\
         {catalog}\n\
         Use the following format:\n\n\
         Question: the input question you must answer\n\
         Thought: you should always think about what to do\n\
         Action: the action to take, should be one of [{names}]\n\
         Action Input: the input to the action\n\
         Observation: the result of the action\n\
         ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original input question\n\n\
         Begin!",
        names = tool_names().join(", ")
    )
}

/// First user turn of the text protocol.
pub fn react_question(task: &str) -> String {
    format!("Question: {task}\nThought:")
}

/// User turn carrying a tool result back to the model.
pub fn react_observation(observation: &str) -> String {
    format!("Observation: {observation}\nThought:")
}
