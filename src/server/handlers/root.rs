pub async fn home() -> &'static str {
    "Webhook Relay"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_home() {
        assert_eq!(home().await, "Webhook Relay");
    }
}
