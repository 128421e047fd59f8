// End-to-end tests for the source against a mock CRM API:
// - connection check with transient 429/5xx responses
// - multi-stream reads with permission-denied and unknown streams
// - partitioned property reads across pages
