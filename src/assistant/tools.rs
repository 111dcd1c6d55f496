//! Local functions the remote assistant can call

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::api::{FunctionDefinition, ToolCall, ToolDefinition, ToolOutput};
use crate::{Error, Result};

/// A function exposed to the assistant
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and parameter schema registered remotely
    fn definition(&self) -> FunctionDefinition;

    /// Run the function with its raw JSON argument payload
    ///
    /// # Errors
    ///
    /// Returns error if the arguments are malformed or the call fails
    async fn call(&self, arguments: &str) -> Result<String>;
}

/// Closed set of handlers, keyed by function name
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, replacing any with the same name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name;
        tracing::debug!(tool = %name, "registered tool");
        self.handlers.insert(name, handler);
    }

    /// Builder form of [`ToolRegistry::register`]
    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Registered function names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Function tool definitions to send when creating the assistant
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers
            .values()
            .map(|h| ToolDefinition::Function {
                function: h.definition(),
            })
            .collect()
    }

    /// Check that the assistant's function tools and the local handlers match
    ///
    /// # Errors
    ///
    /// Returns error naming any tool present on one side only
    pub fn validate(&self, remote: &[ToolDefinition]) -> Result<()> {
        let remote_names: Vec<&str> = remote
            .iter()
            .filter_map(ToolDefinition::function_name)
            .collect();

        let unhandled: Vec<&str> = remote_names
            .iter()
            .copied()
            .filter(|n| !self.handlers.contains_key(*n))
            .collect();
        let unregistered: Vec<&str> = self
            .names()
            .filter(|n| !remote_names.contains(n))
            .collect();

        if unhandled.is_empty() && unregistered.is_empty() {
            return Ok(());
        }

        Err(Error::Tool(format!(
            "tool mismatch: no handler for [{}], not registered remotely [{}]",
            unhandled.join(", "),
            unregistered.join(", ")
        )))
    }

    /// Run one tool call; failures become the output text
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let output = match self.handlers.get(&call.name) {
            Some(handler) => {
                tracing::info!(tool = %call.name, arguments = %call.arguments, "calling tool");
                match handler.call(&call.arguments).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::error!(tool = %call.name, error = %e, "tool call failed");
                        e.to_string()
                    }
                }
            }
            None => {
                tracing::warn!(tool = %call.name, "unknown tool requested");
                format!("unknown tool: {}", call.name)
            }
        };

        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }
}

/// Arguments of `get_weather`
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct WeatherArgs {
    pub location: String,
}

const OPENWEATHERMAP_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Current conditions from OpenWeatherMap
pub struct WeatherTool {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl WeatherTool {
    pub const NAME: &'static str = "get_weather";

    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: OPENWEATHERMAP_URL.to_string(),
        }
    }

    /// Point the tool at a different endpoint
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch(&self, location: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", location),
                ("appid", self.api_key.as_str()),
                ("units", "imperial"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("{status} - {body}")));
        }

        let weather: WeatherResponse = response.json().await?;
        Ok(weather.describe(location))
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: Self::NAME.to_string(),
            description: "Get the current weather for a location".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "City name, e.g. Boston"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn call(&self, arguments: &str) -> Result<String> {
        let args: WeatherArgs = serde_json::from_str(arguments)?;

        match self.fetch(&args.location).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let message = format!("Failed to get weather data for {}: {e}", args.location);
                tracing::error!(location = %args.location, error = %e, "weather lookup failed");
                Ok(message)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    weather: Vec<WeatherCondition>,
    main: WeatherMain,
    wind: WeatherWind,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherWind {
    speed: f64,
}

impl WeatherResponse {
    fn describe(&self, location: &str) -> String {
        let description = self
            .weather
            .first()
            .map_or("unknown conditions", |w| w.description.as_str());
        format!(
            "Weather in {location}: {description}. Temperature: {}°F, Humidity: {}%, Wind Speed: {} mph.",
            self.main.temp, self.main.humidity, self.wind.speed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn definition(&self) -> FunctionDefinition {
            FunctionDefinition {
                name: "echo".to_string(),
                description: String::new(),
                parameters: serde_json::json!({}),
            }
        }

        async fn call(&self, arguments: &str) -> Result<String> {
            if arguments.is_empty() {
                return Err(Error::Tool("nothing to echo".to_string()));
            }
            Ok(arguments.to_string())
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_known_unknown_and_failing() {
        let registry = ToolRegistry::new().with(Arc::new(Echo));

        let out = registry.dispatch(&call("echo", "hi")).await;
        assert_eq!(out.tool_call_id, "call_1");
        assert_eq!(out.output, "hi");

        let out = registry.dispatch(&call("launch", "{}")).await;
        assert_eq!(out.output, "unknown tool: launch");

        let out = registry.dispatch(&call("echo", "")).await;
        assert!(out.output.contains("nothing to echo"));
    }

    #[test]
    fn test_validate() {
        let registry = ToolRegistry::new().with(Arc::new(Echo));

        let mut remote = vec![ToolDefinition::CodeInterpreter];
        remote.extend(registry.definitions());
        assert!(registry.validate(&remote).is_ok());

        assert!(registry.validate(&[ToolDefinition::CodeInterpreter]).is_err());

        let extra = ToolDefinition::Function {
            function: FunctionDefinition {
                name: "other".to_string(),
                description: String::new(),
                parameters: serde_json::Value::Null,
            },
        };
        remote.push(extra);
        assert!(registry.validate(&remote).is_err());
    }

    #[test]
    fn test_weather_report_format() {
        let body = serde_json::json!({
            "weather": [{ "description": "light rain" }],
            "main": { "temp": 54.5, "humidity": 87 },
            "wind": { "speed": 9.2 }
        });
        let resp: WeatherResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            resp.describe("Boston"),
            "Weather in Boston: light rain. Temperature: 54.5°F, Humidity: 87%, Wind Speed: 9.2 mph."
        );
    }

    #[test]
    fn test_weather_args() {
        let args: WeatherArgs = serde_json::from_str(r#"{"location":"Boston"}"#).unwrap();
        assert_eq!(args.location, "Boston");
    }

    #[tokio::test]
    async fn test_weather_bad_arguments_is_error() {
        let tool = WeatherTool::new("key".to_string());
        assert!(tool.call("not json").await.is_err());
        assert_eq!(tool.definition().name, "get_weather");
    }
}
