//! Telemetry units for every metric name the etcd sources emit

/// Unit for `name`, or `None` for names not in the table
pub fn metric_unit(name: &str) -> Option<&'static str> {
    let unit = match name {
        "Followers" => "Count",
        "Latency" => "ms",

        "IsLeader" => "Bool",
        "SendingBandwidthRate" | "ReceivingBandwidthRate" => "B/s",
        "SendingRequestRate" | "ReceivingRequestRate" => "Req/s",
        "SentAppendRequests" | "ReceivedAppendRequests" => "Count",

        "EtcdIndex" | "RaftIndex" => "Index",
        "RaftTerm" => "Term",
        "GetsSuccess" | "GetsFail" | "SetsSuccess" | "SetsFail" | "DeleteSuccess"
        | "DeleteFail" | "UpdateSuccess" | "UpdateFail" | "CreateSuccess" | "CreateFail"
        | "CompareAndSwapSuccess" | "CompareAndSwapFail" | "CompareAndDeleteSuccess"
        | "CompareAndDeleteFail" | "ExpireCount" | "Watchers" => "Count",

        _ => return None,
    };
    Some(unit)
}
