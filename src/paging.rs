//! Shared pagination contract: `page` is 1-based, `hasMore` is true iff the
//! returned row count equals the requested page size.

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub page: i64,
    pub page_size: i64,
}

impl PageParams {
    pub fn from_request(params: &serde_json::Value) -> Result<Self, String> {
        let page = params.get("page").and_then(|v| v.as_i64()).unwrap_or(1);
        let page_size = params
            .get("pageSize")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_PAGE_SIZE);

        if page < 1 {
            return Err(format!("page must be >= 1, got {}", page));
        }
        if page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "pageSize must be in 1..={}, got {}",
                MAX_PAGE_SIZE, page_size
            ));
        }
        Ok(PageParams { page, page_size })
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn has_more(&self, returned: usize) -> bool {
        returned as i64 == self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_when_params_missing() {
        let p = PageParams::from_request(&json!({})).expect("defaults");
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn offset_is_zero_based_from_one_based_page() {
        let p = PageParams::from_request(&json!({ "page": 3, "pageSize": 20 })).expect("params");
        assert_eq!(p.offset(), 40);
        assert_eq!(p.limit(), 20);
    }

    #[test]
    fn has_more_iff_full_page() {
        let p = PageParams::from_request(&json!({ "page": 1, "pageSize": 10 })).expect("params");
        assert!(p.has_more(10));
        assert!(!p.has_more(9));
        assert!(!p.has_more(0));
    }

    #[test]
    fn rejects_out_of_range_params() {
        assert!(PageParams::from_request(&json!({ "page": 0 })).is_err());
        assert!(PageParams::from_request(&json!({ "pageSize": 0 })).is_err());
        assert!(PageParams::from_request(&json!({ "pageSize": MAX_PAGE_SIZE + 1 })).is_err());
    }
}
