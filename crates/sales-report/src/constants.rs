//! Centralized constants for the sales consultation tool
//!
//! Server-specific settings (base URL, token, user area) are loaded from config.toml.

// =============================================================================
// API Endpoints (relative to api.base_url)
// =============================================================================

/// Facts created within a date range (append "/{start}/{end}")
pub const FACTS_RANGE_PATH: &str = "/api/v1/facts/range";

/// Line items of a single fact (append "/{id}")
pub const FACT_DETAILS_PATH: &str = "/api/v1/details/fact";

/// Active facts
pub const FACTS_PATH: &str = "/api/v1/facts";

/// Soft-deleted facts
pub const REMOVED_FACTS_PATH: &str = "/api/v1/facts/removes";

/// Organizational areas
pub const AREAS_PATH: &str = "/api/v1/areas";

/// Default HTTP request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Screens
// =============================================================================

/// Rows per page on the consultation (profit) screen
pub const CONSULT_PAGE_SIZE: usize = 50;

/// Rows per page on the plain listing screen
pub const LISTING_PAGE_SIZE: usize = 10;

/// Status note shown while the cost aggregation is running
pub const COMPUTING_NOTE: &str = "Calculando ganancias...";

/// Message shown instead of the table when the user cannot read facts
pub const ACCESS_DENIED_MESSAGE: &str = "No tienes acceso a este recurso.";

// =============================================================================
// Export
// =============================================================================

/// Download name for the consultation export
pub const CONSULT_EXPORT_FILENAME: &str = "reporte-ventas.csv";

/// Download name for the listing export
pub const LISTING_EXPORT_FILENAME: &str = "listado-ventas.csv";

/// CSV field separator (spreadsheet locales that use ',' as decimal mark)
pub const CSV_DELIMITER: u8 = b';';

/// Date format accepted for range bounds
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Default config file path
pub const CONFIG_FILE: &str = "config.toml";
