pub mod api;
pub mod calendar;
pub mod results;
pub mod weather;

pub use calendar::CalendarIngestor;
pub use results::ResultsIngestor;
pub use weather::WeatherIngestor;
