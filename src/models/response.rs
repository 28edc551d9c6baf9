use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PaginationMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub limit: u64,
    pub page: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// 1-based page request, as accepted on query strings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: u64,

    #[serde(default = "default_limit")]
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
}

pub const MAX_PAGE_LIMIT: u64 = 200;

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    50
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl Page {
    /// Clamps out-of-range values instead of rejecting the request.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1) * self.limit
    }
}

impl PaginationMeta {
    pub fn new(total: u64, page: Page) -> Self {
        let total_pages = total.div_ceil(page.limit.max(1));

        Self {
            total,
            limit: page.limit,
            page: page.page,
            total_pages,
            has_next: page.page < total_pages,
            has_previous: page.page > 1,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
            meta: None,
        }
    }

    pub fn paginated(data: T, meta: PaginationMeta, message: String) -> Self {
        Self {
            meta: Some(meta),
            ..Self::success(data, message)
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
            meta: None,
        }
    }
}
