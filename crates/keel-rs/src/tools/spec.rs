//! Structured tool descriptions.
//!
//! `ToolSpec` turns a purpose line, usage guidance, examples and an output
//! format into the description string the model sees, so every built-in
//! tool describes itself the same way.

use crate::ToolDef;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    /// One-sentence imperative purpose.
    pub purpose: String,
    pub when_to_use: Option<String>,
    /// Steers the model away from a similar tool.
    pub when_not_to_use: Option<String>,
    pub parameters: serde_json::Value,
    /// `(call, behaviour)` pairs.
    pub examples: Vec<(String, String)>,
    pub output_format: Option<String>,
}

impl ToolSpec {
    pub fn builder(name: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            spec: ToolSpec {
                name: name.into(),
                purpose: String::new(),
                when_to_use: None,
                when_not_to_use: None,
                parameters: serde_json::json!({"type": "object", "properties": {}}),
                examples: Vec::new(),
                output_format: None,
            },
        }
    }

    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose.trim_end_matches('.'));
        if let Some(when) = &self.when_to_use {
            desc.push_str(&format!("\nWhen to use: {when}"));
        }
        if let Some(when_not) = &self.when_not_to_use {
            desc.push_str(&format!("\nWhen NOT to use: {when_not}"));
        }
        if !self.examples.is_empty() {
            desc.push_str("\nExamples:");
            for (input, output) in &self.examples {
                desc.push_str(&format!("\n  - {input} → {output}"));
            }
        }
        if let Some(format) = &self.output_format {
            desc.push_str(&format!("\nOutput format: {format}"));
        }
        desc
    }

    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.to_description(),
            self.parameters.clone(),
        )
    }
}

pub struct ToolSpecBuilder {
    spec: ToolSpec,
}

impl ToolSpecBuilder {
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.spec.purpose = purpose.into();
        self
    }

    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.spec.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.spec.when_not_to_use = Some(when_not.into());
        self
    }

    pub fn parameters(mut self, params: serde_json::Value) -> Self {
        self.spec.parameters = params;
        self
    }

    /// Derive the parameter schema from the argument struct so schema and
    /// deserialization cannot drift apart.
    pub fn parameters_for<T: schemars::JsonSchema>(self) -> Self {
        self.parameters(crate::json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.examples.push((input.into(), output.into()));
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.spec.output_format = Some(format.into());
        self
    }

    pub fn build(self) -> ToolSpec {
        self.spec
    }

    pub fn to_tool_def(self) -> ToolDef {
        self.spec.to_tool_def()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_includes_guidance_sections() {
        let spec = ToolSpec::builder("read_lines")
            .purpose("Read a line range from a file")
            .when_to_use("When you know which lines you need")
            .when_not_to_use("When you need the outline; use file_meta")
            .example("read_lines(path='a.rs', start=1, end=20)", "Numbered lines 1-20")
            .output_format("One numbered line per row")
            .build();

        let desc = spec.to_description();
        assert!(desc.starts_with("Read a line range from a file."));
        assert!(desc.contains("When NOT to use: When you need the outline"));
        assert!(desc.contains("Examples:\n  - read_lines"));
        assert!(desc.contains("Output format:"));
    }

    #[test]
    fn optional_sections_are_omitted() {
        let def = ToolSpec::builder("bare")
            .purpose("Do one thing.")
            .to_tool_def();
        assert_eq!(def.function.name, "bare");
        assert_eq!(def.function.description, "Do one thing.");
        assert_eq!(def.function.parameters["type"], "object");
    }
}
