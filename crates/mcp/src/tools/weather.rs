use super::{remote, RegistryError, ToolRegistryBuilder};
use toolsuite_backends::weather::WeatherArgs;
use toolsuite_backends::WeatherClient;
use toolsuite_core::{FieldSchema, InputSchema, ToolCategory, ToolDefinition};

pub fn register(builder: ToolRegistryBuilder, client: &WeatherClient) -> Result<ToolRegistryBuilder, RegistryError> {
    builder.register(
        ToolDefinition::new(
            "weather_get_current",
            "Gets the current weather for a location.",
            ToolCategory::Weather,
            InputSchema::new().field(FieldSchema::string("location", "City name or zip code for weather").required()),
        ),
        remote(client, |w: WeatherClient, a: WeatherArgs| async move { w.current(a).await }),
    )
}
