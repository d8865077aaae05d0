//! Contract bindings for the trove protocol.
//!
//! Only the functions and events the client touches are declared. The
//! interfaces mirror the deployed contracts, so names follow the Solidity
//! sources (`LUSD` is the protocol's debt token).
//!
//! # Usage
//!
//! ```rust,ignore
//! use trove_chain::contracts::bindings::ISortedTroves;
//!
//! let sorted = ISortedTroves::new(address, provider);
//! let size = sorted.getSize().call().await?._0;
//! ```

use alloy::sol;

// ============================================================================
// Borrowing
// ============================================================================

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IBorrowerOperations {
        event TroveUpdated(address indexed _borrower, uint256 _debt, uint256 _coll, uint256 stake, uint8 operation);
        event LUSDBorrowingFeePaid(address indexed _borrower, uint256 _LUSDFee);

        function openTrove(uint256 _maxFeePercentage, uint256 _LUSDAmount, address _upperHint, address _lowerHint) external payable;
        function adjustTrove(uint256 _maxFeePercentage, uint256 _collWithdrawal, uint256 _LUSDChange, bool _isDebtIncrease, address _upperHint, address _lowerHint) external payable;
        function closeTrove() external;
        function claimCollateral() external;
    }
}

// ============================================================================
// Trove bookkeeping, liquidation and redemption
// ============================================================================

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface ITroveManager {
        event Liquidation(uint256 _liquidatedDebt, uint256 _liquidatedColl, uint256 _collGasCompensation, uint256 _LUSDGasCompensation);
        event TroveLiquidated(address indexed _borrower, uint256 _debt, uint256 _coll, uint8 _operation);
        event Redemption(uint256 _attemptedLUSDAmount, uint256 _actualLUSDAmount, uint256 _ETHSent, uint256 _ETHFee);

        function Troves(address _borrower) external view returns (uint256 debt, uint256 coll, uint256 stake, uint8 status, uint128 arrayIndex);
        function rewardSnapshots(address _borrower) external view returns (uint256 ETH, uint256 LUSDDebt);
        function L_ETH() external view returns (uint256);
        function L_LUSDDebt() external view returns (uint256);
        function baseRate() external view returns (uint256);
        function lastFeeOperationTime() external view returns (uint256);
        function MINUTE_DECAY_FACTOR() external view returns (uint256);
        function BETA() external view returns (uint256);
        function getEntireSystemColl() external view returns (uint256);
        function getEntireSystemDebt() external view returns (uint256);

        function liquidate(address _borrower) external;
        function liquidateTroves(uint256 _n) external;
        function batchLiquidateTroves(address[] calldata _troveArray) external;
        function redeemCollateral(
            uint256 _LUSDAmount,
            address _firstRedemptionHint,
            address _upperPartialRedemptionHint,
            address _lowerPartialRedemptionHint,
            uint256 _partialRedemptionHintNICR,
            uint256 _maxIterations,
            uint256 _maxFee
        ) external;
    }
}

// ============================================================================
// Sorted list and hint helpers
// ============================================================================

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface ISortedTroves {
        function getSize() external view returns (uint256);
        function getFirst() external view returns (address);
        function getLast() external view returns (address);
        function getNext(address _id) external view returns (address);
        function getPrev(address _id) external view returns (address);
        function findInsertPosition(uint256 _NICR, address _prevId, address _nextId) external view returns (address, address);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IHintHelpers {
        function getApproxHint(uint256 _CR, uint256 _numTrials, uint256 _inputRandomSeed)
            external view returns (address hintAddress, uint256 diff, uint256 latestRandomSeed);
        function getRedemptionHints(uint256 _LUSDamount, uint256 _price, uint256 _maxIterations)
            external view returns (address firstRedemptionHint, uint256 partialRedemptionHintNICR, uint256 truncatedLUSDamount);
    }
}

// ============================================================================
// Price feed, tokens and pools
// ============================================================================

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IPriceFeed {
        function fetchPrice() external returns (uint256);
        function lastGoodPrice() external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IPriceFeedTestnet {
        function setPrice(uint256 price) external returns (bool);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IDebtToken {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
        function transfer(address recipient, uint256 amount) external returns (bool);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IActivePool {
        event EtherSent(address _to, uint256 _amount);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface ICollSurplusPool {
        function getCollateral(address _account) external view returns (uint256);
    }
}

// ============================================================================
// Stability pool, staking and the governance token
// ============================================================================

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IStabilityPool {
        event UserDepositChanged(address indexed _depositor, uint256 _newDeposit);
        event ETHGainWithdrawn(address indexed _depositor, uint256 _ETH, uint256 _LUSDLoss);
        event LQTYPaidToDepositor(address indexed _depositor, uint256 _LQTY);

        function deposits(address _depositor) external view returns (uint256 initialValue, address frontEndTag);
        function frontEnds(address _frontEnd) external view returns (uint256 kickbackRate, bool registered);
        function getCompoundedLUSDDeposit(address _depositor) external view returns (uint256);
        function getDepositorETHGain(address _depositor) external view returns (uint256);
        function getDepositorLQTYGain(address _depositor) external view returns (uint256);
        function getTotalLUSDDeposits() external view returns (uint256);

        function provideToSP(uint256 _amount, address _frontEndTag) external;
        function withdrawFromSP(uint256 _amount) external;
        function withdrawETHGainToTrove(address _upperHint, address _lowerHint) external;
        function registerFrontEnd(uint256 _kickbackRate) external;
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface ILQTYStaking {
        function stakes(address _user) external view returns (uint256);
        function totalLQTYStaked() external view returns (uint256);
        function getPendingETHGain(address _user) external view returns (uint256);
        function getPendingLUSDGain(address _user) external view returns (uint256);

        function stake(uint256 _LQTYamount) external;
        function unstake(uint256 _LQTYamount) external;
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface ILQTYToken {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address recipient, uint256 amount) external returns (bool);
    }
}
