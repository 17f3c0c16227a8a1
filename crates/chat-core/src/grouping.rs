use crate::types::{DateBucket, NormalizedMessage};

/// Bucket messages by exact date-label equality.
///
/// Buckets come out in the encounter order of their first member; messages
/// inside each bucket are sorted ascending by creation time regardless of
/// the order they were traversed in. Feed newest-first to lay buckets out in
/// descending recency.
pub fn group_by_date<I>(messages: I) -> Vec<DateBucket>
where
    I: IntoIterator<Item = NormalizedMessage>,
{
    let mut buckets: Vec<DateBucket> = Vec::new();

    for message in messages {
        match buckets
            .iter_mut()
            .find(|bucket| bucket.date_label == message.date_label)
        {
            Some(bucket) => bucket.messages.push(message),
            None => buckets.push(DateBucket {
                date_label: message.date_label.clone(),
                messages: vec![message],
            }),
        }
    }

    for bucket in &mut buckets {
        bucket.messages.sort_by_key(|message| message.created_at);
    }

    buckets
}
