#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageReport {
    pub page_index: usize,
    pub objects: usize,
    pub drawn: usize,
    pub skipped: usize,
    pub failed: usize,
    pub prepare_ms: f64,
    pub apply_ms: f64,
    pub command_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeReport {
    pub pages: Vec<PageReport>,
    pub total_ms: f64,
    pub output_bytes: usize,
}

impl ComposeReport {
    pub fn objects(&self) -> usize {
        self.pages.iter().map(|page| page.objects).sum()
    }

    pub fn drawn(&self) -> usize {
        self.pages.iter().map(|page| page.drawn).sum()
    }

    pub fn skipped(&self) -> usize {
        self.pages.iter().map(|page| page.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.pages.iter().map(|page| page.failed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_page_counters() {
        let report = ComposeReport {
            pages: vec![
                PageReport {
                    page_index: 0,
                    objects: 3,
                    drawn: 2,
                    failed: 1,
                    ..PageReport::default()
                },
                PageReport {
                    page_index: 1,
                    objects: 1,
                    skipped: 1,
                    ..PageReport::default()
                },
            ],
            ..ComposeReport::default()
        };
        assert_eq!(report.objects(), 4);
        assert_eq!(report.drawn(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
    }
}
