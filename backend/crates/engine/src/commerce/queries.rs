use chrono::{DateTime, SecondsFormat, Utc};

pub const BULK_RUN_MUTATION: &str = r#"mutation bulkOperationRunQuery($query: String!) {
  bulkOperationRunQuery(query: $query) {
    bulkOperation { id status }
    userErrors { field message }
  }
}"#;

pub const BULK_OPERATION_QUERY: &str = r#"query bulkOperation($id: ID!) {
  node(id: $id) {
    ... on BulkOperation {
      id
      status
      errorCode
      objectCount
      url
    }
  }
}"#;

const ORDER_FIELDS: &str = r#"id
        name
        email
        currencyCode
        createdAt
        updatedAt
        processedAt
        cancelledAt
        displayFinancialStatus
        displayFulfillmentStatus
        totalPriceSet { shopMoney { amount currencyCode } }
        subtotalPriceSet { shopMoney { amount currencyCode } }
        totalTaxSet { shopMoney { amount currencyCode } }
        totalDiscountsSet { shopMoney { amount currencyCode } }
        transactions {
          id
          kind
          status
          gateway
          processedAt
          amountSet { shopMoney { amount currencyCode } }
        }
        lineItems {
          edges {
            node {
              id
              title
              sku
              quantity
              originalUnitPriceSet { shopMoney { amount currencyCode } }
              product { id }
              variant { id }
            }
          }
        }"#;

/// Bulk query over orders with nested line items and transactions.
/// `updated_since` narrows it to orders changed after that instant.
pub fn orders_query(updated_since: Option<DateTime<Utc>>) -> String {
    let filter = match updated_since {
        Some(since) => format!(
            "(query: \"updated_at:>'{}'\")",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => String::new(),
    };
    format!(
        "{{
  orders{filter} {{
    edges {{
      node {{
        {ORDER_FIELDS}
      }}
    }}
  }}
}}"
    )
}

/// Payouts cannot be filtered by update time, so this is always the full list.
pub fn payouts_query() -> String {
    r#"{
  shopifyPaymentsAccount {
    payouts {
      edges {
        node {
          id
          status
          issuedAt
          net { amount currencyCode }
        }
      }
    }
  }
}"#
    .to_string()
}
