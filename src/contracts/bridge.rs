//! Lock/release bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for both sides
//! of the bridge.

use alloy::sol;

sol! {
    /// Source-chain bridge: escrows tokens and emits a lock event
    #[sol(rpc)]
    contract SourceBridge {
        /// Lock `amount` for release to `recipientOnChainB` on the destination chain
        function lockTokens(uint256 amount, address recipientOnChainB) external;

        /// Next nonce the bridge will assign
        function nonce() external view returns (uint256);

        /// Emitted once per lock; `nonce` is unique per source bridge
        event TokensLocked(
            address indexed sender,
            uint256 amount,
            address recipientOnChainB,
            uint256 nonce
        );
    }
}

sol! {
    /// Destination-chain bridge: verifies relayer attestations and releases tokens
    #[sol(rpc)]
    contract DestinationBridge {
        /// Release tokens authorized by a relayer signature
        ///
        /// Reverts with "Invalid signature" when the recovered signer is not
        /// the configured relayer, and "Nonce already processed" on replay.
        function releaseTokens(
            address recipient,
            uint256 amount,
            uint256 nonce,
            bytes signature
        ) external;

        /// Replace the accepted relayer identity (owner only)
        function setRelayer(address relayer) external;

        /// Currently accepted relayer identity
        function relayer() external view returns (address);

        /// Nonce registry
        function processedNonces(uint256 nonce) external view returns (bool);

        event TokensReleased(address indexed recipient, uint256 amount, uint256 nonce);
    }
}
